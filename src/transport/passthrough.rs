//! Secondary pass-through input.
//!
//! Producers on this path already emit normalized envelopes, so messages
//! are forwarded to the reactor byte-for-byte with no decoding. Whether the
//! input exists is decided once at startup by [`open_secondary`].

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SecondaryConfig;
use crate::error::Result;

/// Messages buffered between the secondary source and the reactor
pub const PASSTHROUGH_QUEUE_DEPTH: usize = 256;

/// Pump `source` into `tx` until either side ends.
pub fn spawn_passthrough<S>(source: S, tx: mpsc::Sender<Bytes>) -> JoinHandle<()>
where
    S: Stream<Item = Result<Bytes>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut source = Box::pin(source);
        while let Some(item) = source.next().await {
            match item {
                Ok(msg) => {
                    debug!(bytes = msg.len(), "Secondary message");
                    if tx.send(msg).await.is_err() {
                        debug!("Reactor gone, stopping secondary ingest");
                        return;
                    }
                }
                Err(e) => warn!(error = %e, "Secondary receive failed"),
            }
        }
        info!("Secondary source ended");
    })
}

/// Resolve the configured secondary input.
///
/// Returns `None` when disabled, otherwise the receiving end the reactor
/// reads from.
pub async fn open_secondary(config: &SecondaryConfig) -> Result<Option<mpsc::Receiver<Bytes>>> {
    if !config.enabled {
        return Ok(None);
    }

    connect_secondary(config).await.map(Some)
}

#[cfg(feature = "zmq")]
async fn connect_secondary(config: &SecondaryConfig) -> Result<mpsc::Receiver<Bytes>> {
    let source = zmq::subscribe_all(&config.endpoint).await?;
    let (tx, rx) = mpsc::channel(PASSTHROUGH_QUEUE_DEPTH);
    spawn_passthrough(source, tx);
    info!(endpoint = %config.endpoint, "Secondary ingest connected");
    Ok(rx)
}

#[cfg(not(feature = "zmq"))]
async fn connect_secondary(_config: &SecondaryConfig) -> Result<mpsc::Receiver<Bytes>> {
    Err(crate::error::RelayError::ConfigError(
        crate::error::constants::ERR_SECONDARY_UNAVAILABLE.to_string(),
    ))
}

#[cfg(feature = "zmq")]
mod zmq {
    use bytes::Bytes;
    use futures::Stream;
    use zeromq::{Socket, SocketRecv, SubSocket};

    use crate::error::{RelayError, Result};

    /// SUB socket subscribed to every topic, as a stream of first frames.
    pub async fn subscribe_all(endpoint: &str) -> Result<impl Stream<Item = Result<Bytes>>> {
        let mut socket = SubSocket::new();
        socket
            .connect(endpoint)
            .await
            .map_err(|e| RelayError::Secondary(e.to_string()))?;
        socket
            .subscribe("")
            .await
            .map_err(|e| RelayError::Secondary(e.to_string()))?;

        Ok(futures::stream::unfold(socket, |mut socket| async move {
            let item = socket
                .recv()
                .await
                .map(|msg| msg.into_vec().into_iter().next().unwrap_or_default())
                .map_err(|e| RelayError::Secondary(e.to_string()));
            Some((item, socket))
        }))
    }
}

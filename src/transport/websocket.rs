//! WebSocket subscriber connections.
//!
//! Each accepted TCP connection gets its own task. The task performs the
//! WebSocket handshake, then forwards envelopes from its outbound queue as
//! binary frames. Lifecycle changes and inbound messages are reported to
//! the reactor as [`SubscriberEvent`]s; the reactor alone mutates the hub.

use std::net::SocketAddr;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, instrument, warn};

use crate::error::{RelayError, Result};
use crate::service::hub::SubscriberId;

/// Notification from a connection task to the reactor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriberEvent {
    /// Handshake finished; the subscriber may receive envelopes.
    Opened(SubscriberId),
    /// The subscriber sent something. Logged, never acted upon.
    Inbound {
        id: SubscriberId,
        kind: &'static str,
        len: usize,
    },
    Closed(SubscriberId),
}

/// Spawn the task serving one accepted connection.
pub fn spawn_subscriber(
    id: SubscriberId,
    stream: TcpStream,
    peer: SocketAddr,
    outbound: mpsc::Receiver<Bytes>,
    events: mpsc::UnboundedSender<SubscriberEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        match serve_subscriber(id, stream, outbound, &events).await {
            Ok(()) => info!(%id, %peer, "Subscriber disconnected"),
            Err(RelayError::ChannelClosed) => debug!(%id, %peer, "Reactor gone, dropping subscriber"),
            Err(e) => warn!(%id, %peer, error = %e, "Subscriber connection failed"),
        }
        let _ = events.send(SubscriberEvent::Closed(id));
    })
}

#[instrument(skip(stream, outbound, events), fields(%id))]
async fn serve_subscriber(
    id: SubscriberId,
    stream: TcpStream,
    mut outbound: mpsc::Receiver<Bytes>,
    events: &mpsc::UnboundedSender<SubscriberEvent>,
) -> Result<()> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    events
        .send(SubscriberEvent::Opened(id))
        .map_err(|_| RelayError::ChannelClosed)?;
    let (mut sink, mut source) = ws.split();

    loop {
        tokio::select! {
            envelope = outbound.recv() => match envelope {
                Some(bytes) => sink
                    .send(Message::Binary(bytes))
                    .await
                    .map_err(|e| RelayError::SubscriberIo(e.to_string()))?,
                None => {
                    debug!("Outbound queue closed, closing subscriber");
                    let _ = sink.close().await;
                    return Ok(());
                }
            },
            inbound = source.next() => match inbound {
                Some(Ok(Message::Close(_))) | None => return Ok(()),
                Some(Ok(msg)) => {
                    let kind = message_kind(&msg);
                    events
                        .send(SubscriberEvent::Inbound { id, kind, len: msg.len() })
                        .map_err(|_| RelayError::ChannelClosed)?;
                }
                Some(Err(e)) => return Err(e.into()),
            },
        }
    }
}

fn message_kind(msg: &Message) -> &'static str {
    match msg {
        Message::Text(_) => "text",
        Message::Binary(_) => "binary",
        Message::Ping(_) => "ping",
        Message::Pong(_) => "pong",
        Message::Close(_) => "close",
        Message::Frame(_) => "frame",
    }
}

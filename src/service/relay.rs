//! The relay reactor.
//!
//! [`RelayService`] owns every piece of mutable relay state: the pending
//! fragment sets, the subscriber set, the channel filter and the counters.
//! [`run`] drives it from a single `select!` loop, so handlers run to
//! completion one at a time and need no locks.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::config::{FilterConfig, RelayConfig};
use crate::core::packet::{decode, Frame};
use crate::core::reassembly::FragmentReassembler;
use crate::error::{RelayError, Result};
use crate::service::hub::{BroadcastHub, BroadcastReport};
use crate::transport::websocket::{spawn_subscriber, SubscriberEvent};
use crate::transport::{multicast, passthrough};
use crate::utils::metrics::RelayMetrics;

/// Channels suppressed from the single-message feed
#[derive(Debug, Clone, Default)]
pub struct ChannelFilter {
    suppressed: Vec<Bytes>,
}

impl ChannelFilter {
    pub fn new<I, S>(channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            suppressed: channels
                .into_iter()
                .map(|c| Bytes::copy_from_slice(c.as_ref().as_bytes()))
                .collect(),
        }
    }

    pub fn is_suppressed(&self, channel: &[u8]) -> bool {
        self.suppressed.iter().any(|c| c.as_ref() == channel)
    }
}

impl From<&FilterConfig> for ChannelFilter {
    fn from(config: &FilterConfig) -> Self {
        Self::new(&config.suppressed_channels)
    }
}

/// What happened to one datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Broadcast(BroadcastReport),
    /// Single message on a suppressed channel
    Filtered,
    /// Fragment stored; its set is not complete yet
    Buffered,
}

/// Relay state owned by the reactor
#[derive(Debug)]
pub struct RelayService {
    reassembler: FragmentReassembler,
    hub: BroadcastHub,
    filter: ChannelFilter,
    metrics: Arc<RelayMetrics>,
}

impl RelayService {
    pub fn new(config: &RelayConfig) -> Self {
        Self {
            reassembler: FragmentReassembler::with_settings(
                config.reassembly.high_water_mark,
                config.reassembly.max_age,
            ),
            hub: BroadcastHub::new(config.websocket.subscriber_queue_depth),
            filter: ChannelFilter::from(&config.filter),
            metrics: Arc::new(RelayMetrics::new()),
        }
    }

    /// Decode, route and broadcast one datagram received now.
    pub fn handle_datagram(&mut self, datagram: Bytes) -> Result<Outcome> {
        self.handle_datagram_at(datagram, Instant::now())
    }

    /// Decode, route and broadcast one datagram received at `now`.
    ///
    /// The reassembly registry is swept afterwards if it has grown past its
    /// high-water mark, whatever happened to the datagram itself.
    pub fn handle_datagram_at(&mut self, datagram: Bytes, now: Instant) -> Result<Outcome> {
        self.metrics.datagram_received(datagram.len() as u64);

        let outcome = self.route(datagram, now);
        if outcome.is_err() {
            self.metrics.malformed_packet();
        }

        let expired = self.reassembler.maybe_sweep(now);
        if expired > 0 {
            self.metrics.sets_expired(expired as u64);
        }
        outcome
    }

    fn route(&mut self, datagram: Bytes, now: Instant) -> Result<Outcome> {
        match decode(datagram)? {
            Frame::Envelope(bytes) => Ok(Outcome::Broadcast(self.broadcast(&bytes))),
            Frame::Single(msg) => {
                if self.filter.is_suppressed(msg.envelope.channel()) {
                    trace!(channel = %msg.envelope.channel_lossy(), "Suppressed channel");
                    self.metrics.message_filtered();
                    return Ok(Outcome::Filtered);
                }
                trace!(
                    seq = msg.sequence_id,
                    channel = %msg.envelope.channel_lossy(),
                    "Single message"
                );
                Ok(Outcome::Broadcast(self.broadcast(&msg.envelope.to_bytes())))
            }
            Frame::Fragment(frag) => {
                self.metrics.fragment_received();
                match self
                    .reassembler
                    .ingest_at(frag.key, frag.index, frag.chunk, now)
                {
                    Some(message) => {
                        self.metrics.set_completed();
                        Ok(Outcome::Broadcast(self.broadcast(&message)))
                    }
                    None => Ok(Outcome::Buffered),
                }
            }
        }
    }

    /// Forward a secondary-input message without decoding it.
    pub fn handle_passthrough(&mut self, message: Bytes) -> BroadcastReport {
        self.metrics.passthrough_message();
        self.broadcast(&message)
    }

    /// Apply a lifecycle or inbound notification from a connection task.
    pub fn handle_event(&mut self, event: SubscriberEvent) {
        match event {
            SubscriberEvent::Opened(id) => {
                if self.hub.open(id) {
                    self.metrics.subscriber_opened();
                    info!(%id, subscribers = self.hub.open_count(), "Subscriber connected");
                }
            }
            SubscriberEvent::Inbound { id, kind, len } => {
                info!(%id, kind, len, "Received message from subscriber, ignoring");
            }
            SubscriberEvent::Closed(id) => {
                if self.hub.close(id) {
                    self.metrics.subscriber_closed();
                    info!(%id, subscribers = self.hub.open_count(), "Subscriber removed");
                }
            }
        }
    }

    fn broadcast(&mut self, bytes: &Bytes) -> BroadcastReport {
        let report = self.hub.broadcast(bytes);
        self.metrics
            .broadcast(report.delivered as u64, report.failed as u64);
        report
    }

    pub fn hub(&self) -> &BroadcastHub {
        &self.hub
    }

    pub fn hub_mut(&mut self) -> &mut BroadcastHub {
        &mut self.hub
    }

    pub fn reassembler(&self) -> &FragmentReassembler {
        &self.reassembler
    }

    pub fn metrics(&self) -> Arc<RelayMetrics> {
        Arc::clone(&self.metrics)
    }

    fn on_datagram(&mut self, datagram: Bytes, peer: SocketAddr) {
        if let Err(e) = self.handle_datagram(datagram) {
            warn!(%peer, error = %e, "Dropping datagram");
        }
    }

    fn on_accept(
        &mut self,
        stream: tokio::net::TcpStream,
        peer: SocketAddr,
        events: &mpsc::UnboundedSender<SubscriberEvent>,
    ) {
        let (id, outbound) = self.hub.register();
        debug!(%id, %peer, "Accepted subscriber connection");
        spawn_subscriber(id, stream, peer, outbound, events.clone());
    }
}

/// Bound sockets the reactor reads from
#[derive(Debug)]
pub struct RelaySockets {
    pub multicast: UdpSocket,
    pub websocket: TcpListener,
    pub secondary: Option<mpsc::Receiver<Bytes>>,
    /// Receive buffer size for one datagram
    pub max_datagram_size: usize,
}

/// Drive the relay until `shutdown_rx` fires or its sender is dropped.
#[instrument(skip_all)]
pub async fn run(
    mut service: RelayService,
    sockets: RelaySockets,
    mut shutdown_rx: mpsc::Receiver<()>,
) -> Result<()> {
    let RelaySockets {
        multicast,
        websocket,
        mut secondary,
        max_datagram_size,
    } = sockets;

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let mut buf = vec![0u8; max_datagram_size];

    info!(
        multicast = ?multicast.local_addr().ok(),
        websocket = ?websocket.local_addr().ok(),
        secondary = secondary.is_some(),
        "Relay running"
    );

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("Shutting down relay");
                break;
            }

            received = multicast.recv_from(&mut buf) => match received {
                Ok((len, peer)) => {
                    service.on_datagram(Bytes::copy_from_slice(&buf[..len]), peer);
                }
                Err(e) => warn!(error = %e, "Multicast receive failed"),
            },

            accepted = websocket.accept() => match accepted {
                Ok((stream, peer)) => service.on_accept(stream, peer, &events_tx),
                Err(e) => error!(error = %e, "Error accepting subscriber"),
            },

            Some(event) = events_rx.recv() => service.handle_event(event),

            message = recv_secondary(&mut secondary) => match message {
                Some(bytes) => {
                    service.handle_passthrough(bytes);
                }
                None => {
                    info!("Secondary ingest ended");
                    secondary = None;
                }
            },
        }
    }

    service.metrics.log_metrics();
    Ok(())
}

async fn recv_secondary(rx: &mut Option<mpsc::Receiver<Bytes>>) -> Option<Bytes> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Forward one interrupt from `signal` into the shutdown channel.
///
/// If the signal cannot be installed the relay keeps serving; the caller
/// still holds a sender, so the reactor does not see a closed channel.
async fn forward_signal<F>(signal: F, shutdown_tx: mpsc::Sender<()>)
where
    F: std::future::Future<Output = std::io::Result<()>>,
{
    match signal.await {
        Ok(()) => {
            info!("Received CTRL+C signal, shutting down");
            let _ = shutdown_tx.send(()).await;
        }
        Err(e) => error!(error = %e, "Failed to listen for CTRL+C; relay keeps running"),
    }
}

/// Bind every configured transport and run until Ctrl-C.
#[instrument(skip(config))]
pub async fn serve(config: RelayConfig) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
    tokio::spawn(forward_signal(tokio::signal::ctrl_c(), shutdown_tx.clone()));

    let result = serve_with_shutdown(config, shutdown_rx).await;
    drop(shutdown_tx);
    result
}

/// Bind every configured transport and run until `shutdown_rx` fires.
pub async fn serve_with_shutdown(
    config: RelayConfig,
    shutdown_rx: mpsc::Receiver<()>,
) -> Result<()> {
    config.validate_strict()?;

    let multicast = multicast::bind(&config.multicast)?;
    let websocket = TcpListener::bind(&config.websocket.address)
        .await
        .map_err(|e| {
            RelayError::FatalTransport(format!(
                "Failed to listen on {}: {e}",
                config.websocket.address
            ))
        })?;
    let secondary = passthrough::open_secondary(&config.secondary).await?;

    let sockets = RelaySockets {
        multicast,
        websocket,
        secondary,
        max_datagram_size: config.multicast.max_datagram_size,
    };
    run(RelayService::new(&config), sockets, shutdown_rx).await
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use bytes::{BufMut, BytesMut};
    use std::time::Duration;

    fn single(channel: &[u8], payload: &[u8]) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_slice(&[0x4C, 0x43, 0x30, 0x32]);
        buf.put_u32(1);
        buf.put_slice(channel);
        buf.put_u8(0);
        buf.put_slice(payload);
        buf.freeze()
    }

    fn fragment(seq: u32, index: u16, count: u16, body: &[u8]) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_slice(&[0x4C, 0x43, 0x30, 0x33]);
        buf.put_u32(seq);
        buf.put_u32(0);
        buf.put_u32(0);
        buf.put_u16(index);
        buf.put_u16(count);
        buf.put_slice(body);
        buf.freeze()
    }

    fn service_with_subscriber() -> (RelayService, mpsc::Receiver<Bytes>) {
        let mut service = RelayService::new(&RelayConfig::default());
        let (id, rx) = service.hub_mut().register();
        service.handle_event(SubscriberEvent::Opened(id));
        (service, rx)
    }

    #[test]
    fn test_filtered_channel_is_not_broadcast() {
        let (mut service, mut rx) = service_with_subscriber();
        let outcome = service.handle_datagram(single(b"vicon", &[1])).unwrap();
        assert_eq!(outcome, Outcome::Filtered);
        assert!(rx.try_recv().is_err());
        assert_eq!(service.metrics().snapshot().filtered_messages, 1);
    }

    #[test]
    fn test_single_message_is_broadcast() {
        let (mut service, mut rx) = service_with_subscriber();
        service.handle_datagram(single(b"pose", &[0xAA, 0xBB])).unwrap();
        assert_eq!(
            rx.try_recv().unwrap().as_ref(),
            &[0x81, 0xD9, 0x04, 0x70, 0x6F, 0x73, 0x65, 0xAA, 0xBB]
        );
    }

    #[test]
    fn test_fragments_are_reassembled() {
        let (mut service, mut rx) = service_with_subscriber();
        let first = service.handle_datagram(fragment(42, 1, 2, &[0x02, 0x03])).unwrap();
        assert_eq!(first, Outcome::Buffered);
        service.handle_datagram(fragment(42, 0, 2, b"cam\0\x01")).unwrap();
        assert_eq!(
            rx.try_recv().unwrap().as_ref(),
            &[0x81, 0xD9, 0x03, 0x63, 0x61, 0x6D, 0x01, 0x02, 0x03]
        );
    }

    #[test]
    fn test_malformed_datagram_is_counted() {
        let (mut service, mut rx) = service_with_subscriber();
        let err = service.handle_datagram(Bytes::from_static(&[0x00])).unwrap_err();
        assert!(err.is_malformed_packet());
        assert!(rx.try_recv().is_err());
        assert_eq!(service.metrics().snapshot().malformed_packets, 1);
    }

    #[test]
    fn test_sweep_runs_after_high_water_mark() {
        let mut service = RelayService::new(&RelayConfig::default());
        let t0 = Instant::now();
        for seq in 0..=50 {
            service
                .handle_datagram_at(fragment(seq, 1, 2, &[]), t0)
                .unwrap();
        }
        assert_eq!(service.reassembler().pending(), 51);

        // Fresh set pushes the registry over the mark; old ones are stale.
        service
            .handle_datagram_at(fragment(999, 1, 2, &[]), t0 + Duration::from_millis(1001))
            .unwrap();
        assert_eq!(service.reassembler().pending(), 1);
        assert_eq!(service.metrics().snapshot().sets_expired, 51);
    }

    #[test]
    fn test_passthrough_is_byte_for_byte() {
        let (mut service, mut rx) = service_with_subscriber();
        let raw = Bytes::from_static(b"\x00not-an-envelope");
        let report = service.handle_passthrough(raw.clone());
        assert_eq!(report.delivered, 1);
        assert_eq!(rx.try_recv().unwrap(), raw);
    }

    #[test]
    fn test_closed_subscriber_receives_nothing() {
        let (mut service, mut rx) = service_with_subscriber();
        let id = crate::service::hub::SubscriberId(1);
        service.handle_event(SubscriberEvent::Closed(id));
        assert!(service.hub().is_empty());
        let report = service.handle_passthrough(Bytes::from_static(b"x"));
        assert_eq!(report.delivered, 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_custom_filter() {
        let filter = ChannelFilter::new(["a", "bb"]);
        assert!(filter.is_suppressed(b"bb"));
        assert!(!filter.is_suppressed(b"b"));
        assert!(!ChannelFilter::default().is_suppressed(b"vicon"));
    }

    async fn loopback_sockets() -> (RelaySockets, SocketAddr) {
        let multicast = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = multicast.local_addr().unwrap();
        let sockets = RelaySockets {
            multicast,
            websocket: TcpListener::bind("127.0.0.1:0").await.unwrap(),
            secondary: None,
            max_datagram_size: 65_536,
        };
        (sockets, addr)
    }

    #[tokio::test]
    async fn test_failed_signal_listener_keeps_relay_serving() {
        let (sockets, addr) = loopback_sockets().await;
        let service = RelayService::new(&RelayConfig::default());
        let metrics = service.metrics();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        forward_signal(
            async { Err(std::io::Error::other("signal unsupported")) },
            shutdown_tx.clone(),
        )
        .await;

        let handle = tokio::spawn(run(service, sockets, shutdown_rx));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender.send_to(&single(b"pose", &[1]), addr).await.unwrap();
        let mut seen = false;
        for _ in 0..100 {
            if metrics.snapshot().datagrams_received == 1 {
                seen = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(seen, "relay stopped reading datagrams");

        shutdown_tx.send(()).await.unwrap();
        let result = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_signal_sends_shutdown() {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        forward_signal(async { Ok(()) }, shutdown_tx).await;
        assert_eq!(shutdown_rx.recv().await, Some(()));
    }
}

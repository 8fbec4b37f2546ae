//! Envelope fan-out to live subscribers.
//!
//! Every subscriber owns a bounded outbound queue drained by its connection
//! task. Broadcasting never waits: a subscriber whose queue is full or gone
//! misses that envelope and nobody else notices. Stale telemetry has no
//! value to a live viewer, so nothing is retried.

use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace, warn};

/// Identifier assigned to a subscriber on accept
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriberId(pub u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Connection lifecycle of a subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberState {
    /// Accepted, handshake still running
    Connecting,
    Open,
    /// Removed from the registry; never written to again
    Closed,
}

/// One live stream connection
#[derive(Debug)]
pub struct Subscriber {
    pub id: SubscriberId,
    state: SubscriberState,
    outbound: mpsc::Sender<Bytes>,
}

impl Subscriber {
    pub fn state(&self) -> SubscriberState {
        self.state
    }
}

/// Outcome of one broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    /// Subscribers not yet (or no longer) open
    pub skipped: usize,
    /// Open subscribers whose queue rejected the envelope
    pub failed: usize,
}

/// Registry of subscribers and the fan-out over them
#[derive(Debug)]
pub struct BroadcastHub {
    subscribers: BTreeMap<SubscriberId, Subscriber>,
    next_id: u64,
    queue_depth: usize,
}

impl BroadcastHub {
    /// Create a hub whose subscribers buffer up to `queue_depth` envelopes
    pub fn new(queue_depth: usize) -> Self {
        Self {
            subscribers: BTreeMap::new(),
            next_id: 1,
            queue_depth: queue_depth.max(1),
        }
    }

    /// Track a freshly accepted connection in the CONNECTING state.
    ///
    /// Returns its id and the receiving end of its outbound queue.
    pub fn register(&mut self) -> (SubscriberId, mpsc::Receiver<Bytes>) {
        let id = SubscriberId(self.next_id);
        self.next_id += 1;

        let (tx, rx) = mpsc::channel(self.queue_depth);
        self.subscribers.insert(
            id,
            Subscriber {
                id,
                state: SubscriberState::Connecting,
                outbound: tx,
            },
        );
        debug!(%id, "Subscriber connecting");
        (id, rx)
    }

    /// Mark a subscriber OPEN. Returns false if it is unknown or closed.
    pub fn open(&mut self, id: SubscriberId) -> bool {
        match self.subscribers.get_mut(&id) {
            Some(sub) if sub.state == SubscriberState::Connecting => {
                sub.state = SubscriberState::Open;
                debug!(%id, "Subscriber open");
                true
            }
            _ => false,
        }
    }

    /// Mark a subscriber CLOSED by dropping it from the registry.
    pub fn close(&mut self, id: SubscriberId) -> bool {
        match self.subscribers.remove(&id) {
            Some(sub) => {
                debug!(%id, was_open = sub.state == SubscriberState::Open, "Subscriber closed");
                true
            }
            None => false,
        }
    }

    /// Write `bytes` to every OPEN subscriber.
    pub fn broadcast(&self, bytes: &Bytes) -> BroadcastReport {
        let mut report = BroadcastReport::default();

        for sub in self.subscribers.values() {
            if sub.state != SubscriberState::Open {
                report.skipped += 1;
                continue;
            }
            match sub.outbound.try_send(bytes.clone()) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    report.failed += 1;
                    warn!(id = %sub.id, "Subscriber queue full, dropping envelope");
                }
                Err(TrySendError::Closed(_)) => {
                    report.failed += 1;
                    warn!(id = %sub.id, "Subscriber queue closed, dropping envelope");
                }
            }
        }

        trace!(
            bytes = bytes.len(),
            delivered = report.delivered,
            skipped = report.skipped,
            failed = report.failed,
            "Broadcast envelope"
        );
        report
    }

    /// Lifecycle state of `id`, or `None` if this hub never issued it.
    pub fn state(&self, id: SubscriberId) -> Option<SubscriberState> {
        match self.subscribers.get(&id) {
            Some(sub) => Some(sub.state()),
            None if id.0 > 0 && id.0 < self.next_id => Some(SubscriberState::Closed),
            None => None,
        }
    }

    /// Number of tracked subscribers in any state
    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    pub fn open_count(&self) -> usize {
        self.subscribers
            .values()
            .filter(|s| s.state == SubscriberState::Open)
            .count()
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn test_register_open_close() {
        let mut hub = BroadcastHub::new(4);
        let (id, _rx) = hub.register();
        assert_eq!(hub.state(id), Some(SubscriberState::Connecting));
        assert!(hub.open(id));
        assert_eq!(hub.state(id), Some(SubscriberState::Open));
        assert!(!hub.open(id));
        assert!(hub.close(id));
        assert_eq!(hub.state(id), Some(SubscriberState::Closed));
        assert!(!hub.close(id));
        assert!(!hub.open(id));
    }

    #[test]
    fn test_closed_is_observable_and_unknown_is_none() {
        let mut hub = BroadcastHub::new(4);
        let (closed, mut closed_rx) = hub.register();
        let (live, mut live_rx) = hub.register();
        hub.open(closed);
        hub.open(live);
        hub.close(closed);

        assert_eq!(hub.state(closed), Some(SubscriberState::Closed));
        assert_eq!(hub.state(SubscriberId(99)), None);
        assert_eq!(hub.state(SubscriberId(0)), None);
        assert_eq!(hub.len(), 1);

        let report = hub.broadcast(&Bytes::from_static(b"y"));
        assert_eq!(report, BroadcastReport { delivered: 1, skipped: 0, failed: 0 });
        assert!(closed_rx.try_recv().is_err());
        assert!(live_rx.try_recv().is_ok());
    }

    #[test]
    fn test_identical_bytes_to_all_open() {
        let mut hub = BroadcastHub::new(4);
        let mut receivers = Vec::new();
        for _ in 0..3 {
            let (id, rx) = hub.register();
            hub.open(id);
            receivers.push(rx);
        }
        let msg = Bytes::from_static(&[0x81, 0xD9, 0x00, 1, 2]);
        let report = hub.broadcast(&msg);
        assert_eq!(report.delivered, 3);

        for rx in &mut receivers {
            assert_eq!(rx.try_recv().unwrap(), msg);
        }
    }

    #[test]
    fn test_connecting_subscriber_is_skipped() {
        let mut hub = BroadcastHub::new(4);
        let (pending, mut pending_rx) = hub.register();
        let (open, mut open_rx) = hub.register();
        hub.open(open);

        let report = hub.broadcast(&Bytes::from_static(b"x"));
        assert_eq!(report, BroadcastReport { delivered: 1, skipped: 1, failed: 0 });
        assert!(pending_rx.try_recv().is_err());
        assert!(open_rx.try_recv().is_ok());
        assert_eq!(hub.state(pending), Some(SubscriberState::Connecting));
    }

    #[test]
    fn test_full_queue_is_isolated() {
        let mut hub = BroadcastHub::new(1);
        let (slow, _slow_rx) = hub.register();
        let (fast, mut fast_rx) = hub.register();
        hub.open(slow);
        hub.open(fast);

        hub.broadcast(&Bytes::from_static(b"a"));
        fast_rx.try_recv().unwrap();

        let report = hub.broadcast(&Bytes::from_static(b"b"));
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(fast_rx.try_recv().unwrap(), Bytes::from_static(b"b"));
        assert_eq!(hub.state(slow), Some(SubscriberState::Open));
    }

    #[test]
    fn test_dropped_receiver_is_isolated() {
        let mut hub = BroadcastHub::new(4);
        let (gone, gone_rx) = hub.register();
        let (live, mut live_rx) = hub.register();
        hub.open(gone);
        hub.open(live);
        drop(gone_rx);

        let report = hub.broadcast(&Bytes::from_static(b"z"));
        assert_eq!(report.failed, 1);
        assert_eq!(report.delivered, 1);
        assert!(live_rx.try_recv().is_ok());
    }
}

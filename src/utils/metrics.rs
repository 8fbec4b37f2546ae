//! Relay counters
//!
//! Atomic counters owned by the relay service. The reactor is the only
//! writer; atomics keep snapshots cheap to read from other tasks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Counters for one relay instance
#[derive(Debug)]
pub struct RelayMetrics {
    /// Datagrams read from the multicast socket
    pub datagrams_received: AtomicU64,
    /// Bytes read from the multicast socket
    pub bytes_received: AtomicU64,
    /// Datagrams dropped by the decoder
    pub malformed_packets: AtomicU64,
    /// Single messages suppressed by the channel filter
    pub filtered_messages: AtomicU64,
    /// Messages forwarded from the secondary input
    pub passthrough_messages: AtomicU64,
    /// Fragments handed to the reassembler
    pub fragments_received: AtomicU64,
    /// Fragment sets emitted
    pub sets_completed: AtomicU64,
    /// Fragment sets dropped by a sweep
    pub sets_expired: AtomicU64,
    /// Envelopes fanned out to subscribers
    pub envelopes_broadcast: AtomicU64,
    /// Per-subscriber deliveries
    pub deliveries: AtomicU64,
    /// Failed per-subscriber writes
    pub subscriber_errors: AtomicU64,
    pub subscribers_opened: AtomicU64,
    pub subscribers_closed: AtomicU64,
    start_time: Instant,
}

impl RelayMetrics {
    pub fn new() -> Self {
        Self {
            datagrams_received: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            malformed_packets: AtomicU64::new(0),
            filtered_messages: AtomicU64::new(0),
            passthrough_messages: AtomicU64::new(0),
            fragments_received: AtomicU64::new(0),
            sets_completed: AtomicU64::new(0),
            sets_expired: AtomicU64::new(0),
            envelopes_broadcast: AtomicU64::new(0),
            deliveries: AtomicU64::new(0),
            subscriber_errors: AtomicU64::new(0),
            subscribers_opened: AtomicU64::new(0),
            subscribers_closed: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn datagram_received(&self, byte_count: u64) {
        self.datagrams_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn malformed_packet(&self) {
        self.malformed_packets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_filtered(&self) {
        self.filtered_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn passthrough_message(&self) {
        self.passthrough_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn fragment_received(&self) {
        self.fragments_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_completed(&self) {
        self.sets_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn sets_expired(&self, count: u64) {
        self.sets_expired.fetch_add(count, Ordering::Relaxed);
    }

    /// Record one broadcast and its outcome
    pub fn broadcast(&self, delivered: u64, failed: u64) {
        self.envelopes_broadcast.fetch_add(1, Ordering::Relaxed);
        self.deliveries.fetch_add(delivered, Ordering::Relaxed);
        self.subscriber_errors.fetch_add(failed, Ordering::Relaxed);
    }

    pub fn subscriber_opened(&self) {
        self.subscribers_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn subscriber_closed(&self) {
        self.subscribers_closed.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            datagrams_received: self.datagrams_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            malformed_packets: self.malformed_packets.load(Ordering::Relaxed),
            filtered_messages: self.filtered_messages.load(Ordering::Relaxed),
            passthrough_messages: self.passthrough_messages.load(Ordering::Relaxed),
            fragments_received: self.fragments_received.load(Ordering::Relaxed),
            sets_completed: self.sets_completed.load(Ordering::Relaxed),
            sets_expired: self.sets_expired.load(Ordering::Relaxed),
            envelopes_broadcast: self.envelopes_broadcast.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            subscriber_errors: self.subscriber_errors.load(Ordering::Relaxed),
            subscribers_opened: self.subscribers_opened.load(Ordering::Relaxed),
            subscribers_closed: self.subscribers_closed.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let s = self.snapshot();
        info!(
            datagrams_received = s.datagrams_received,
            bytes_received = s.bytes_received,
            malformed_packets = s.malformed_packets,
            filtered_messages = s.filtered_messages,
            passthrough_messages = s.passthrough_messages,
            fragments_received = s.fragments_received,
            sets_completed = s.sets_completed,
            sets_expired = s.sets_expired,
            envelopes_broadcast = s.envelopes_broadcast,
            deliveries = s.deliveries,
            subscriber_errors = s.subscriber_errors,
            subscribers_opened = s.subscribers_opened,
            subscribers_closed = s.subscribers_closed,
            uptime_seconds = s.uptime_seconds,
            "Relay metrics snapshot"
        );
    }
}

impl Default for RelayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub datagrams_received: u64,
    pub bytes_received: u64,
    pub malformed_packets: u64,
    pub filtered_messages: u64,
    pub passthrough_messages: u64,
    pub fragments_received: u64,
    pub sets_completed: u64,
    pub sets_expired: u64,
    pub envelopes_broadcast: u64,
    pub deliveries: u64,
    pub subscriber_errors: u64,
    pub subscribers_opened: u64,
    pub subscribers_closed: u64,
    pub uptime_seconds: u64,
}

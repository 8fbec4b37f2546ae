//! Fragment reassembly with loss-tolerant expiry.
//!
//! Producers split large messages into numbered fragments that may arrive
//! in any order, or not at all. Each in-flight message is tracked as a
//! fragment set keyed by `(sequence_id, fragment_count)`:
//!
//! ```text
//! CREATED --fragment--> ACCUMULATING --all present--> COMPLETE (emit, remove)
//!                            |
//!                            +--sweep, age > max_age--> EXPIRED (remove)
//! ```
//!
//! Completion is checked synchronously on every fragment. Expiry is only
//! evaluated by [`FragmentReassembler::maybe_sweep`] once the number of
//! pending sets exceeds the high-water mark, so the scan is paid only under
//! loss. A fragment arriving for a key after its set was removed starts a
//! fresh set.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, info, trace};

/// Pending-set count above which a sweep is triggered.
pub const DEFAULT_HIGH_WATER_MARK: usize = 50;

/// Age past which an incomplete set is dropped during a sweep.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_millis(1000);

/// Identifies one in-flight fragmented message.
///
/// Including the fragment count keeps messages apart when sequence counters
/// wrap or repeat across messages of different sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FragmentSetKey {
    pub sequence_id: u32,
    pub fragment_count: u16,
}

impl FragmentSetKey {
    pub fn new(sequence_id: u32, fragment_count: u16) -> Self {
        Self {
            sequence_id,
            fragment_count,
        }
    }
}

impl std::fmt::Display for FragmentSetKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.sequence_id, self.fragment_count)
    }
}

/// Chunks received so far for one key.
///
/// Slots are sparse: memory follows the fragments actually received, not
/// the count the producer announced.
#[derive(Debug)]
struct FragmentSet {
    last_update: Instant,
    fragment_count: u16,
    chunks: BTreeMap<u16, Bytes>,
}

impl FragmentSet {
    fn new(fragment_count: u16, now: Instant) -> Self {
        Self {
            last_update: now,
            fragment_count,
            chunks: BTreeMap::new(),
        }
    }

    /// Store a chunk. Duplicates overwrite without counting twice.
    fn insert(&mut self, index: u16, chunk: Bytes) {
        self.chunks.insert(index, chunk);
    }

    fn received(&self) -> usize {
        self.chunks.len()
    }

    /// Fragment 0 carries the channel header, so it must be present too.
    fn is_complete(&self) -> bool {
        self.received() == usize::from(self.fragment_count) && self.chunks.contains_key(&0)
    }

    fn concat(self) -> Bytes {
        let len = self.chunks.values().map(Bytes::len).sum();
        let mut buf = BytesMut::with_capacity(len);
        for chunk in self.chunks.into_values() {
            buf.put(chunk);
        }
        buf.freeze()
    }
}

/// Counters describing the reassembler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReassemblyStats {
    pub pending: usize,
    pub completed: u64,
    pub expired: u64,
    pub sweeps: u64,
}

/// Registry of in-flight fragment sets
#[derive(Debug)]
pub struct FragmentReassembler {
    pending: HashMap<FragmentSetKey, FragmentSet>,
    high_water_mark: usize,
    max_age: Duration,
    completed: u64,
    expired: u64,
    sweeps: u64,
}

impl FragmentReassembler {
    /// Create a reassembler with the default high-water mark (50) and
    /// max age (1000 ms)
    pub fn new() -> Self {
        Self::with_settings(DEFAULT_HIGH_WATER_MARK, DEFAULT_MAX_AGE)
    }

    pub fn with_settings(high_water_mark: usize, max_age: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            high_water_mark,
            max_age,
            completed: 0,
            expired: 0,
            sweeps: 0,
        }
    }

    /// Ingest a fragment using the current time.
    pub fn ingest(&mut self, key: FragmentSetKey, index: u16, chunk: Bytes) -> Option<Bytes> {
        self.ingest_at(key, index, chunk, Instant::now())
    }

    /// Ingest a fragment observed at `now`.
    ///
    /// Returns the concatenated chunks, in index order, when this fragment
    /// completes its set. The set is removed before returning, so a key is
    /// emitted at most once. Fragments with `index >= fragment_count` are
    /// ignored.
    pub fn ingest_at(
        &mut self,
        key: FragmentSetKey,
        index: u16,
        chunk: Bytes,
        now: Instant,
    ) -> Option<Bytes> {
        if index >= key.fragment_count {
            debug!(%key, index, "Ignoring fragment outside its set");
            return None;
        }

        let set = self
            .pending
            .entry(key)
            .or_insert_with(|| FragmentSet::new(key.fragment_count, now));
        set.last_update = now;
        set.insert(index, chunk);
        trace!(%key, index, received = set.received(), "Fragment stored");

        if !set.is_complete() {
            return None;
        }

        let set = self.pending.remove(&key)?;
        self.completed += 1;
        let message = set.concat();
        debug!(%key, bytes = message.len(), "Fragment set complete");
        Some(message)
    }

    /// Sweep if the registry holds more than the high-water mark.
    ///
    /// Returns the number of sets dropped.
    pub fn maybe_sweep(&mut self, now: Instant) -> usize {
        if self.pending.len() > self.high_water_mark {
            self.sweep(now)
        } else {
            0
        }
    }

    /// Drop every set whose last fragment is older than the max age.
    ///
    /// Sets aged exactly `max_age` or less are kept.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let before = self.pending.len();
        let max_age = self.max_age;

        self.pending.retain(|key, set| {
            let age = now.saturating_duration_since(set.last_update);
            let keep = age <= max_age;
            if !keep {
                debug!(%key, age_ms = age.as_millis() as u64, "Dropping stale fragment set");
            }
            keep
        });

        let removed = before - self.pending.len();
        self.expired += removed as u64;
        self.sweeps += 1;
        info!(
            before,
            after = self.pending.len(),
            removed,
            "Pruned pending fragment sets"
        );
        removed
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn contains(&self, key: &FragmentSetKey) -> bool {
        self.pending.contains_key(key)
    }

    pub fn stats(&self) -> ReassemblyStats {
        ReassemblyStats {
            pending: self.pending.len(),
            completed: self.completed,
            expired: self.expired,
            sweeps: self.sweeps,
        }
    }

    /// Drop all pending sets without emitting them
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

impl Default for FragmentReassembler {
    fn default() -> Self {
        Self::new()
    }
}

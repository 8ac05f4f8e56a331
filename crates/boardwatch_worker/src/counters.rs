//! Shared run counters.
//!
//! Feed tasks increment these from many tasks at once; the heartbeat and
//! the terminal write read consistent-enough snapshots. Relaxed ordering
//! is fine: each counter is independent and only summed for reporting.

use boardwatch_protocol::CounterSnapshot;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct RunCounters {
    feeds_count: AtomicU64,
    found: AtomicU64,
    candidates: AtomicU64,
    added: AtomicU64,
    updated: AtomicU64,
    skipped_old: AtomicU64,
    skipped_unchanged: AtomicU64,
    no_timestamp: AtomicU64,
    writes: AtomicU64,
    errors_count: AtomicU64,
}

impl RunCounters {
    pub fn new(feeds_count: u64) -> Self {
        let counters = Self::default();
        counters.feeds_count.store(feeds_count, Ordering::Relaxed);
        counters
    }

    pub fn add_found(&self, n: u64) {
        self.found.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_candidates(&self, n: u64) {
        self.candidates.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_skipped_old(&self, n: u64) {
        self.skipped_old.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_no_timestamp(&self, n: u64) {
        self.no_timestamp.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_skipped_unchanged(&self, n: u64) {
        self.skipped_unchanged.fetch_add(n, Ordering::Relaxed);
    }

    pub fn incr_errors(&self) {
        self.errors_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Fold in what the bulk writer actually committed.
    pub fn record_writes(&self, added: u64, updated: u64, failures: u64) {
        self.added.fetch_add(added, Ordering::Relaxed);
        self.updated.fetch_add(updated, Ordering::Relaxed);
        self.writes.fetch_add(added + updated, Ordering::Relaxed);
        self.errors_count.fetch_add(failures, Ordering::Relaxed);
    }

    pub fn errors(&self) -> u64 {
        self.errors_count.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            feeds_count: self.feeds_count.load(Ordering::Relaxed),
            found: self.found.load(Ordering::Relaxed),
            candidates: self.candidates.load(Ordering::Relaxed),
            added: self.added.load(Ordering::Relaxed),
            updated: self.updated.load(Ordering::Relaxed),
            skipped_old: self.skipped_old.load(Ordering::Relaxed),
            skipped_unchanged: self.skipped_unchanged.load(Ordering::Relaxed),
            no_timestamp: self.no_timestamp.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            errors_count: self.errors_count.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_increments() {
        let counters = RunCounters::new(2);
        counters.add_found(5);
        counters.add_candidates(3);
        counters.add_skipped_old(1);
        counters.add_no_timestamp(1);
        counters.add_skipped_unchanged(1);
        counters.record_writes(2, 1, 0);

        let snap = counters.snapshot();
        assert_eq!(snap.feeds_count, 2);
        assert_eq!(snap.found, 5);
        assert_eq!(snap.candidates, 3);
        assert_eq!(snap.added, 2);
        assert_eq!(snap.updated, 1);
        assert_eq!(snap.writes, 3);
        // conservation: found = candidates + skipped_old + no_timestamp
        assert_eq!(snap.found, snap.candidates + snap.skipped_old + snap.no_timestamp);
    }

    #[test]
    fn write_failures_count_as_errors() {
        let counters = RunCounters::new(1);
        counters.record_writes(1, 0, 2);
        assert_eq!(counters.errors(), 2);
        assert_eq!(counters.snapshot().writes, 1);
    }
}

//! Store counters
//!
//! Counters only, monotonic, reset on process start. Relaxed atomics; exact
//! values are not needed across threads at any given instant.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Operational counters of one store handle
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    units_committed: AtomicU64,
    units_aborted: AtomicU64,
    units_timed_out: AtomicU64,
    records_created: AtomicU64,
    records_updated: AtomicU64,
    records_deleted: AtomicU64,
    flushes: AtomicU64,
    flush_failures: AtomicU64,
    bytes_flushed: AtomicU64,
    notifications: AtomicU64,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // Units of work

    pub fn increment_units_committed(&self) {
        self.units_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_units_aborted(&self) {
        self.units_aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_units_timed_out(&self) {
        self.units_timed_out.fetch_add(1, Ordering::Relaxed);
    }

    /// Count the row operations of one committed unit
    pub fn add_record_ops(&self, created: u64, updated: u64, deleted: u64) {
        self.records_created.fetch_add(created, Ordering::Relaxed);
        self.records_updated.fetch_add(updated, Ordering::Relaxed);
        self.records_deleted.fetch_add(deleted, Ordering::Relaxed);
    }

    // Flush

    pub fn record_flush(&self, bytes: u64) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        self.bytes_flushed.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn increment_flush_failures(&self) {
        self.flush_failures.fetch_add(1, Ordering::Relaxed);
    }

    // Observation

    pub fn increment_notifications(&self) {
        self.notifications.fetch_add(1, Ordering::Relaxed);
    }

    /// Get all counters as a snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            units_committed: self.units_committed.load(Ordering::Relaxed),
            units_aborted: self.units_aborted.load(Ordering::Relaxed),
            units_timed_out: self.units_timed_out.load(Ordering::Relaxed),
            records_created: self.records_created.load(Ordering::Relaxed),
            records_updated: self.records_updated.load(Ordering::Relaxed),
            records_deleted: self.records_deleted.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            flush_failures: self.flush_failures.load(Ordering::Relaxed),
            bytes_flushed: self.bytes_flushed.load(Ordering::Relaxed),
            notifications: self.notifications.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of all counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub units_committed: u64,
    pub units_aborted: u64,
    pub units_timed_out: u64,
    pub records_created: u64,
    pub records_updated: u64,
    pub records_deleted: u64,
    pub flushes: u64,
    pub flush_failures: u64,
    pub bytes_flushed: u64,
    pub notifications: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_registry_is_zero() {
        assert_eq!(MetricsRegistry::new().snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_counters() {
        let metrics = MetricsRegistry::new();
        metrics.increment_units_committed();
        metrics.increment_units_committed();
        metrics.increment_units_aborted();
        metrics.add_record_ops(3, 1, 1);
        metrics.record_flush(1024);
        metrics.increment_flush_failures();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.units_committed, 2);
        assert_eq!(snapshot.units_aborted, 1);
        assert_eq!(snapshot.records_created, 3);
        assert_eq!(snapshot.records_updated, 1);
        assert_eq!(snapshot.records_deleted, 1);
        assert_eq!(snapshot.flushes, 1);
        assert_eq!(snapshot.bytes_flushed, 1024);
        assert_eq!(snapshot.flush_failures, 1);
    }

    #[test]
    fn test_snapshot_serializes() {
        let json = serde_json::to_value(MetricsRegistry::new().snapshot()).unwrap();
        assert_eq!(json["units_committed"], 0);
    }
}

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counters for the engine, shared lock-free between producer
/// threads and the background loops.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    entries_written: AtomicU64,
    entries_failed: AtomicU64,
    entries_buffered: AtomicU64,
    entries_dropped: AtomicU64,
    batches_sent: AtomicU64,
    batches_failed: AtomicU64,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_written(&self, count: u64) {
        self.entries_written.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_failed(&self, count: u64) {
        self.entries_failed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_buffered(&self) {
        self.entries_buffered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.entries_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch_sent(&self) {
        self.batches_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch_failed(&self) {
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the counters as of call time. Readers never mutate.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            entries_written: self.entries_written.load(Ordering::Relaxed),
            entries_failed: self.entries_failed.load(Ordering::Relaxed),
            entries_buffered: self.entries_buffered.load(Ordering::Relaxed),
            entries_dropped: self.entries_dropped.load(Ordering::Relaxed),
            batches_sent: self.batches_sent.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the six engine counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub entries_written: u64,
    pub entries_failed: u64,
    pub entries_buffered: u64,
    pub entries_dropped: u64,
    pub batches_sent: u64,
    pub batches_failed: u64,
}

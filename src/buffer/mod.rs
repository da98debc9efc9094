use crate::domain::LogEntry;
use crate::metrics::MetricsRegistry;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::warn;

/// Bounded, drop-oldest retry queue for entries that failed to persist or
/// send.
///
/// `offer` never fails: when the buffer is at capacity the oldest entry is
/// evicted and counted as dropped. Entries leave only through a successful
/// retry in [`ErrorBuffer::drain_and_retry`], which is invoked at the start
/// of every `log()` call rather than on a dedicated timer.
#[derive(Debug)]
pub struct ErrorBuffer {
    entries: Mutex<VecDeque<LogEntry>>,
    capacity: usize,
    metrics: Arc<MetricsRegistry>,
}

impl ErrorBuffer {
    pub fn new(capacity: usize, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity,
            metrics,
        }
    }

    /// Enqueue a failed entry for later retry, evicting the oldest entry
    /// when full.
    pub fn offer(&self, entry: LogEntry) {
        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity {
            entries.pop_front();
            self.metrics.record_dropped();
            warn!("error buffer full, dropped oldest entry");
        }
        entries.push_back(entry);
        self.metrics.record_buffered();
    }

    /// Swap the buffered entries out under the lock, then retry each one
    /// outside it. Entries the callback rejects are re-offered, which may
    /// itself evict.
    pub fn drain_and_retry<F>(&self, mut persist: F)
    where
        F: FnMut(LogEntry) -> Result<(), LogEntry>,
    {
        let to_retry = {
            let mut entries = self.entries.lock();
            if entries.is_empty() {
                return;
            }
            std::mem::take(&mut *entries)
        };

        for entry in to_retry {
            if let Err(entry) = persist(entry) {
                self.offer(entry);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

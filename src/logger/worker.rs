use crate::buffer::ErrorBuffer;
use crate::domain::LogEntry;
use crate::metrics::MetricsRegistry;
use crate::transport::{Frame, PushTransport};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Interval between background batch flushes.
const FLUSH_INTERVAL: Duration = Duration::from_millis(500);
/// Granularity at which the flush loop observes the stop flag.
const STOP_POLL: Duration = Duration::from_millis(50);
/// Shutdown waits at most this long for the flush thread; a thread still
/// stuck in a send is detached rather than blocking the caller.
const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Worker-role pipeline: entries accumulate into a bounded batch that is
/// pushed to the collector on a size trigger or by the background flush
/// loop, whichever fires first.
pub(crate) struct WorkerPipeline {
    shared: Arc<WorkerShared>,
    stop: Arc<AtomicBool>,
    // The receiver disconnects when the flush thread exits, which lets
    // shutdown bound its wait before joining.
    flush_thread: Mutex<Option<(JoinHandle<()>, mpsc::Receiver<()>)>>,
}

pub(crate) struct WorkerShared {
    transport: PushTransport,
    batch: Mutex<Vec<LogEntry>>,
    capacity: usize,
    metrics: Arc<MetricsRegistry>,
    errors: Arc<ErrorBuffer>,
}

impl WorkerPipeline {
    pub(crate) fn start(
        endpoint: impl Into<String>,
        buffer_size: usize,
        metrics: Arc<MetricsRegistry>,
        errors: Arc<ErrorBuffer>,
    ) -> Self {
        let shared = Arc::new(WorkerShared {
            transport: PushTransport::new(endpoint),
            batch: Mutex::new(Vec::new()),
            // buffer_size 0 means unbatched: every entry flushes at once
            capacity: buffer_size.max(1),
            metrics,
            errors,
        });

        let stop = Arc::new(AtomicBool::new(false));
        let (done_tx, done_rx) = mpsc::channel();
        let flush_thread = {
            let shared = shared.clone();
            let stop = stop.clone();
            std::thread::spawn(move || {
                // Dropped on every exit path, including unwinding
                let _done = done_tx;
                flush_loop(&shared, &stop);
            })
        };

        Self {
            shared,
            stop,
            flush_thread: Mutex::new(Some((flush_thread, done_rx))),
        }
    }

    /// Append one entry, pushing the batch when it reaches capacity.
    pub(crate) fn enqueue(&self, entry: LogEntry) {
        self.shared.enqueue(entry);
    }

    /// Drain the error buffer into the batch, then push whatever is pending.
    pub(crate) fn flush(&self) {
        self.shared.flush();
    }

    /// Stop the flush loop, push the final batch, and drop the connection.
    /// The join is bounded by [`JOIN_TIMEOUT`].
    pub(crate) fn shutdown(&self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some((handle, done)) = self.flush_thread.lock().take() {
            match done.recv_timeout(JOIN_TIMEOUT) {
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    warn!("worker flush thread still busy after {JOIN_TIMEOUT:?}, detaching");
                }
                _ => {
                    if handle.join().is_err() {
                        warn!("worker flush thread panicked during shutdown");
                    }
                }
            }
        }
        self.shared.flush();
        self.shared.transport.close();
        info!("worker pipeline stopped");
    }
}

impl WorkerShared {
    fn enqueue(&self, entry: LogEntry) {
        let ready = {
            let mut batch = self.batch.lock();
            batch.push(entry);
            if batch.len() >= self.capacity {
                Some(std::mem::take(&mut *batch))
            } else {
                None
            }
        };

        if let Some(entries) = ready {
            self.send_batch(entries);
        }
    }

    fn flush(&self) {
        self.errors.drain_and_retry(|entry| {
            self.enqueue(entry);
            Ok(())
        });

        let pending = std::mem::take(&mut *self.batch.lock());
        if !pending.is_empty() {
            self.send_batch(pending);
        }
    }

    /// Push one batch. The batch is already cleared from the accumulator;
    /// on failure every entry goes to the error buffer instead.
    fn send_batch(&self, entries: Vec<LogEntry>) {
        let count = entries.len() as u64;
        let frame = Frame::batch(entries);

        match self.transport.send(&frame) {
            Ok(()) => {
                if let Frame::Batch { id, .. } = &frame {
                    debug!("sent batch {id} ({count} entries)");
                }
                self.metrics.record_batch_sent();
                self.metrics.record_written(count);
            }
            Err(e) => {
                warn!("batch send failed, buffering {count} entries: {e}");
                self.metrics.record_batch_failed();
                self.metrics.record_failed(count);
                if let Frame::Batch { entries, .. } = frame {
                    for entry in entries {
                        self.errors.offer(entry);
                    }
                }
            }
        }
    }
}

fn flush_loop(shared: &WorkerShared, stop: &AtomicBool) {
    info!("worker flush loop started, interval {FLUSH_INTERVAL:?}");
    while !stop.load(Ordering::Relaxed) {
        let mut waited = Duration::ZERO;
        while waited < FLUSH_INTERVAL && !stop.load(Ordering::Relaxed) {
            std::thread::sleep(STOP_POLL);
            waited += STOP_POLL;
        }
        if stop.load(Ordering::Relaxed) {
            break;
        }
        shared.flush();
    }
}

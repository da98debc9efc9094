use crate::buffer::ErrorBuffer;
use crate::domain::LogEntry;
use crate::metrics::MetricsRegistry;
use crate::transport::{Frame, PullTransport};
use crate::writer::RotatingFileWriter;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Bounded blocking receive per loop iteration; also the cooperative
/// cancellation point, so shutdown latency is bounded by this timeout.
const POLL_TIMEOUT: Duration = Duration::from_millis(300);
/// Shutdown waits at most this long for the receive thread; covers a
/// receive poll plus an in-flight payload read.
const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Collector-role pipeline: a dedicated thread pulls frames from workers
/// and fans every entry out to the local rotating writer.
pub(crate) struct CollectorPipeline {
    shared: Arc<CollectorShared>,
    stop: Arc<AtomicBool>,
    // The receiver disconnects when the loop thread exits, which lets
    // shutdown bound its wait before joining.
    receive_thread: Mutex<Option<(JoinHandle<()>, mpsc::Receiver<()>)>>,
}

pub(crate) struct CollectorShared {
    transport: PullTransport,
    writer: Arc<RotatingFileWriter>,
    metrics: Arc<MetricsRegistry>,
    errors: Arc<ErrorBuffer>,
}

impl CollectorPipeline {
    pub(crate) fn new(
        transport: PullTransport,
        writer: Arc<RotatingFileWriter>,
        metrics: Arc<MetricsRegistry>,
        errors: Arc<ErrorBuffer>,
    ) -> Self {
        Self {
            shared: Arc::new(CollectorShared {
                transport,
                writer,
                metrics,
                errors,
            }),
            stop: Arc::new(AtomicBool::new(false)),
            receive_thread: Mutex::new(None),
        }
    }

    /// Launch the receive loop thread.
    pub(crate) fn launch(&self) {
        let shared = self.shared.clone();
        let stop = self.stop.clone();
        let (done_tx, done_rx) = mpsc::channel();
        let handle = std::thread::spawn(move || {
            // Dropped on every exit path, including unwinding
            let _done = done_tx;
            receive_loop(&shared, &stop);
        });
        *self.receive_thread.lock() = Some((handle, done_rx));
    }

    pub(crate) fn writer(&self) -> &Arc<RotatingFileWriter> {
        &self.shared.writer
    }

    pub(crate) fn local_addr(&self) -> Option<std::net::SocketAddr> {
        self.shared.transport.local_addr().ok()
    }

    /// Signal the loop, join it, and release the transport. The join is
    /// bounded by [`JOIN_TIMEOUT`].
    pub(crate) fn shutdown(&self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some((handle, done)) = self.receive_thread.lock().take() {
            match done.recv_timeout(JOIN_TIMEOUT) {
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    warn!("collector receive thread still busy after {JOIN_TIMEOUT:?}, detaching");
                }
                _ => {
                    if handle.join().is_err() {
                        warn!("collector receive thread panicked during shutdown");
                    }
                }
            }
        }
        self.shared.transport.close();
        info!("collector pipeline stopped");
    }
}

fn receive_loop(shared: &CollectorShared, stop: &AtomicBool) {
    info!("collector receive loop started, poll timeout {POLL_TIMEOUT:?}");
    while !stop.load(Ordering::Relaxed) {
        match shared.transport.recv_timeout(POLL_TIMEOUT) {
            Ok(None) => {}
            Ok(Some(Frame::Entry { entry })) => shared.persist(entry),
            Ok(Some(Frame::Batch { id, entries })) => {
                debug!("received batch {id} ({} entries)", entries.len());
                for entry in entries {
                    shared.persist(entry);
                }
            }
            // Best-effort availability: a bad frame or connection never
            // stops the loop
            Err(e) => warn!("collector receive error: {e}"),
        }
    }
}

impl CollectorShared {
    fn persist(&self, entry: LogEntry) {
        match self.writer.write(&entry) {
            Ok(()) => self.metrics.record_written(1),
            Err(e) => {
                warn!("collector write failed, buffering entry: {e}");
                self.metrics.record_failed(1);
                self.errors.offer(entry);
            }
        }
    }
}

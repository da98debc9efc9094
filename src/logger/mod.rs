mod collector;
pub mod registry;
mod worker;

use crate::buffer::ErrorBuffer;
use crate::config::{Config, ConfigError, Level};
use crate::domain::LogEntry;
use crate::metrics::{MetricsRegistry, MetricsSnapshot};
use crate::retention::RetentionSweeper;
use crate::transport::{PullTransport, TransportError};
use crate::writer::RotatingFileWriter;
use collector::CollectorPipeline;
use parking_lot::Mutex;
use std::net::ToSocketAddrs;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use worker::WorkerPipeline;

#[derive(Error, Debug)]
pub enum LoggerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Failed to open log writer: {0}")]
    Persistence(#[from] crate::writer::PersistenceError),
    #[error("Failed to bind collector endpoint: {0}")]
    Bind(#[from] TransportError),
    #[error("Logger already started")]
    AlreadyStarted,
    #[error("Logger already stopped")]
    AlreadyStopped,
}

/// How a facade persists or ships entries; fixed for the facade's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Role {
    /// Write directly to local rotated files
    Local,
    /// Batch entries and push them to a remote collector
    Worker,
    /// Pull batches from workers and persist them locally
    Collector,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Initialized,
    Running,
    Stopped,
}

/// Role-specific machinery, selected once at construction. Exhaustive
/// matches at the few call sites that differ keep the behavior auditable.
enum Pipeline {
    Local { writer: Arc<RotatingFileWriter> },
    Worker(WorkerPipeline),
    Collector(CollectorPipeline),
}

/// Unified logger facade over the three roles.
///
/// `log()` never surfaces persistence or transport failures; failed entries
/// land in the bounded error buffer and are retried at the start of every
/// subsequent `log()` call. Observable degradation shows up only in the
/// metrics snapshot.
pub struct Logger {
    service: String,
    config: Config,
    metrics: Arc<MetricsRegistry>,
    errors: Arc<ErrorBuffer>,
    pipeline: Pipeline,
    state: Mutex<State>,
}

impl Logger {
    /// Local role: the writer opens immediately and one retention sweep
    /// runs before the first entry.
    pub fn local(service: impl Into<String>, config: Config) -> Result<Self, LoggerError> {
        let service = service.into();
        config.validate()?;

        let writer = Arc::new(RotatingFileWriter::new(&service, &config));
        writer.open()?;
        startup_sweep(&config, &service);

        let metrics = Arc::new(MetricsRegistry::new());
        let errors = Arc::new(ErrorBuffer::new(config.max_error_buffer, metrics.clone()));
        info!("local logger started for {service}");

        Ok(Self {
            service,
            config,
            metrics,
            errors,
            pipeline: Pipeline::Local { writer },
            state: Mutex::new(State::Running),
        })
    }

    /// Worker role: connects lazily to the collector endpoint and starts
    /// the background flush loop immediately.
    pub fn worker(
        service: impl Into<String>,
        config: Config,
        endpoint: impl Into<String>,
    ) -> Result<Self, LoggerError> {
        let service = service.into();
        let endpoint = endpoint.into();
        config.validate()?;

        let metrics = Arc::new(MetricsRegistry::new());
        let errors = Arc::new(ErrorBuffer::new(config.max_error_buffer, metrics.clone()));
        let pipeline =
            WorkerPipeline::start(&endpoint, config.buffer_size, metrics.clone(), errors.clone());
        info!("worker logger started for {service}, shipping to {endpoint}");

        Ok(Self {
            service,
            config,
            metrics,
            errors,
            pipeline: Pipeline::Worker(pipeline),
            state: Mutex::new(State::Running),
        })
    }

    /// Collector role: binds the receiving endpoint and opens the writer,
    /// but the receive loop only runs after [`Logger::start`].
    pub fn collector<A: ToSocketAddrs>(
        service: impl Into<String>,
        config: Config,
        listen: A,
    ) -> Result<Self, LoggerError> {
        let service = service.into();
        config.validate()?;

        let transport = PullTransport::bind(listen)?;
        let writer = Arc::new(RotatingFileWriter::new(&service, &config));
        writer.open()?;
        startup_sweep(&config, &service);

        let metrics = Arc::new(MetricsRegistry::new());
        let errors = Arc::new(ErrorBuffer::new(config.max_error_buffer, metrics.clone()));
        let pipeline =
            CollectorPipeline::new(transport, writer, metrics.clone(), errors.clone());
        match pipeline.local_addr() {
            Some(addr) => info!("collector logger initialized for {service} on {addr}"),
            None => info!("collector logger initialized for {service}"),
        }

        Ok(Self {
            service,
            config,
            metrics,
            errors,
            pipeline: Pipeline::Collector(pipeline),
            state: Mutex::new(State::Initialized),
        })
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn role(&self) -> Role {
        match &self.pipeline {
            Pipeline::Local { .. } => Role::Local,
            Pipeline::Worker(_) => Role::Worker,
            Pipeline::Collector(_) => Role::Collector,
        }
    }

    /// Bound receiving address; `None` unless this is a collector.
    pub fn listen_addr(&self) -> Option<std::net::SocketAddr> {
        match &self.pipeline {
            Pipeline::Collector(pipeline) => pipeline.local_addr(),
            Pipeline::Local { .. } | Pipeline::Worker(_) => None,
        }
    }

    /// Launch the collector receive loop. A no-op for roles that are
    /// already running from construction.
    pub fn start(&self) -> Result<(), LoggerError> {
        let mut state = self.state.lock();
        match (*state, &self.pipeline) {
            (State::Initialized, Pipeline::Collector(pipeline)) => {
                pipeline.launch();
                *state = State::Running;
                Ok(())
            }
            (State::Running, _) => Ok(()),
            (State::Stopped, _) => Err(LoggerError::AlreadyStopped),
            (State::Initialized, _) => Ok(()),
        }
    }

    /// Log one entry through the active role.
    ///
    /// Buffered failures are retried first, then the entry itself is
    /// dispatched; neither path raises to the caller.
    pub fn log(&self, entry: impl Into<LogEntry>) {
        let entry = entry.into();

        if *self.state.lock() == State::Stopped {
            warn!("log() on stopped logger {}, entry buffered", self.service);
            self.metrics.record_failed(1);
            self.errors.offer(entry);
            return;
        }

        self.drain_errors();

        if self.config.console_enabled {
            console_echo(self.config.level, &self.service, &entry);
        }

        match &self.pipeline {
            Pipeline::Local { writer } => self.persist(writer, entry),
            Pipeline::Worker(pipeline) => pipeline.enqueue(entry),
            Pipeline::Collector(pipeline) => self.persist(pipeline.writer(), entry),
        }
    }

    /// Push any batched or buffered entries now.
    pub fn flush(&self) {
        match &self.pipeline {
            Pipeline::Local { .. } | Pipeline::Collector(_) => self.drain_errors(),
            Pipeline::Worker(pipeline) => pipeline.flush(),
        }
    }

    /// Stop background loops, flush remaining entries, and release file
    /// handles and sockets. Idempotent; later `log()` calls only buffer.
    pub fn stop(&self) {
        {
            let mut state = self.state.lock();
            if *state == State::Stopped {
                return;
            }
            *state = State::Stopped;
        }

        match &self.pipeline {
            Pipeline::Local { writer } => {
                self.drain_errors();
                writer.close();
            }
            Pipeline::Worker(pipeline) => pipeline.shutdown(),
            Pipeline::Collector(pipeline) => {
                pipeline.shutdown();
                self.drain_errors();
                pipeline.writer().close();
            }
        }
        info!("logger {} stopped", self.service);
    }

    /// Copy of the six engine counters as of call time.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Entries currently waiting in the retry buffer.
    pub fn buffered_errors(&self) -> usize {
        self.errors.len()
    }

    fn persist(&self, writer: &Arc<RotatingFileWriter>, entry: LogEntry) {
        match writer.write(&entry) {
            Ok(()) => self.metrics.record_written(1),
            Err(e) => {
                warn!("write failed for {}, entry buffered: {e}", self.service);
                self.metrics.record_failed(1);
                self.errors.offer(entry);
            }
        }
    }

    /// Opportunistic retry of previously failed entries, role-aware.
    fn drain_errors(&self) {
        match &self.pipeline {
            Pipeline::Local { writer } => self.drain_into_writer(writer),
            Pipeline::Collector(pipeline) => self.drain_into_writer(pipeline.writer()),
            Pipeline::Worker(pipeline) => {
                self.errors.drain_and_retry(|entry| {
                    pipeline.enqueue(entry);
                    Ok(())
                });
            }
        }
    }

    fn drain_into_writer(&self, writer: &Arc<RotatingFileWriter>) {
        self.errors.drain_and_retry(|entry| match writer.write(&entry) {
            Ok(()) => {
                self.metrics.record_written(1);
                Ok(())
            }
            Err(e) => {
                debug!("retry write failed, entry stays buffered: {e}");
                self.metrics.record_failed(1);
                Err(entry)
            }
        });
    }
}

impl Drop for Logger {
    /// Deterministic cleanup on every exit path; `stop()` is idempotent.
    fn drop(&mut self) {
        self.stop();
    }
}

fn startup_sweep(config: &Config, service: &str) {
    let sweeper = RetentionSweeper::new(&config.log_dir, service, config.retention_days);
    if let Err(e) = sweeper.sweep() {
        error!("startup retention sweep failed for {service}: {e}");
    }
}

/// Echo a formatted entry through the host tracing channel at the
/// configured level.
fn console_echo(level: Level, service: &str, entry: &LogEntry) {
    let rendered = match entry {
        LogEntry::Text(message) => message.clone(),
        LogEntry::Structured(fields) => {
            serde_json::to_string(fields).unwrap_or_else(|_| "<unrenderable entry>".to_string())
        }
    };
    match level {
        Level::Debug => debug!(target: "frakt::console", %service, "{rendered}"),
        Level::Info => info!(target: "frakt::console", %service, "{rendered}"),
        Level::Warning => warn!(target: "frakt::console", %service, "{rendered}"),
        Level::Error | Level::Critical => {
            error!(target: "frakt::console", %service, "{rendered}");
        }
    }
}

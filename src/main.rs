use anyhow::Context;
use clap::Parser;
use frakt::{Config, LogEntry, Logger, Role};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{Level, error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Unified log shipping and rotation engine.
#[derive(Parser, Debug)]
#[command(name = "frakt", version, about)]
struct Cli {
    /// How this process handles entries
    #[arg(long, value_enum, default_value = "local")]
    role: Role,

    /// Service name; defaults to the host name
    #[arg(long)]
    service: Option<String>,

    /// Configuration file (.json, .yaml, or .yml)
    #[arg(long, env = "FRAKT_CONFIG")]
    config: Option<PathBuf>,

    /// Collector endpoint a worker pushes to, host:port
    #[arg(long, env = "FRAKT_ENDPOINT", default_value = "127.0.0.1:5555")]
    endpoint: String,

    /// Address a collector listens on
    #[arg(long, env = "FRAKT_LISTEN", default_value = "0.0.0.0:5555")]
    listen: String,

    /// Persist entries as JSON objects
    #[arg(long)]
    structured: bool,
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => Config::default(),
    };
    if cli.structured {
        config.structured_format = true;
    }

    let service = match cli.service {
        Some(name) => name,
        None => hostname::get()
            .context("resolving host name for service")?
            .to_string_lossy()
            .into_owned(),
    };

    info!("starting frakt {} as {:?} for {service}", frakt::VERSION, cli.role);

    let logger = match cli.role {
        Role::Local => Logger::local(&service, config)?,
        Role::Worker => Logger::worker(&service, config, cli.endpoint)?,
        Role::Collector => {
            let logger = Logger::collector(&service, config, cli.listen.as_str())?;
            logger.start()?;
            logger
        }
    };

    match cli.role {
        Role::Local | Role::Worker => forward_stdin(&logger),
        Role::Collector => run_collector(&logger)?,
    }

    logger.stop();
    let snapshot = logger.metrics();
    info!(
        "final counters: written={} failed={} buffered={} dropped={} batches_sent={} batches_failed={}",
        snapshot.entries_written,
        snapshot.entries_failed,
        snapshot.entries_buffered,
        snapshot.entries_dropped,
        snapshot.batches_sent,
        snapshot.batches_failed,
    );
    Ok(())
}

fn init_tracing() {
    // JSON output when RUST_LOG_FORMAT=json, human-readable otherwise
    let use_json = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    let filter = EnvFilter::from_default_env().add_directive(Level::INFO.into());
    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().flatten_event(true))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry().with(fmt::layer()).with(filter).init();
    }
}

/// Read stdin line by line and log each one; JSON object lines become
/// structured entries.
fn forward_stdin(logger: &Logger) {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        match line {
            Ok(line) if line.is_empty() => {}
            Ok(line) => match serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(&line) {
                Ok(fields) => logger.log(LogEntry::Structured(fields)),
                Err(_) => logger.log(line),
            },
            Err(e) => {
                error!("stdin read failed: {e}");
                break;
            }
        }
    }
}

/// Keep the collector alive until SIGINT, reporting counters periodically.
fn run_collector(logger: &Logger) -> anyhow::Result<()> {
    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || stop.store(true, Ordering::Relaxed))
            .context("installing signal handler")?;
    }

    let mut last_report = std::time::Instant::now();
    while !stop.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(100));
        if last_report.elapsed() >= Duration::from_secs(5) {
            let snapshot = logger.metrics();
            info!(
                "written={} failed={} buffered={} dropped={}",
                snapshot.entries_written,
                snapshot.entries_failed,
                snapshot.entries_buffered,
                snapshot.entries_dropped,
            );
            last_report = std::time::Instant::now();
        }
    }
    info!("shutdown requested");
    Ok(())
}

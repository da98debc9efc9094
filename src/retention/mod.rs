use chrono::{DateTime, Duration as ChronoDuration, Local};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Error, Debug)]
pub enum SweepError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Retention pass: log files older than the retention window are packed
/// into a gzip'd tar archive and removed.
///
/// The resulting layout is an outer `{service}_archive_{ts}_wrapped.tar.gz`
/// holding a single inner `{service}_archive_{ts}.tar.gz`, which holds the
/// swept `.log` files. The double wrap reproduces the observed upstream
/// layout; consumers unwrap twice.
pub struct RetentionSweeper {
    root: PathBuf,
    service: String,
    retention_days: u32,
}

impl RetentionSweeper {
    pub fn new(root: impl Into<PathBuf>, service: impl Into<String>, retention_days: u32) -> Self {
        Self {
            root: root.into(),
            service: service.into(),
            retention_days,
        }
    }

    /// Run one sweep cycle. Returns the number of files archived.
    ///
    /// Originals are deleted only after the inner archive is complete; if
    /// archiving fails the cycle is abandoned and everything stays on disk
    /// for the next scheduled run.
    pub fn sweep(&self) -> Result<usize, SweepError> {
        let cutoff = Local::now() - ChronoDuration::days(i64::from(self.retention_days));
        let old_files = self.collect_old_files(cutoff)?;
        if old_files.is_empty() {
            return Ok(0);
        }

        let stamp = Local::now().format("%Y%m%d%H%M%S");
        let base = format!("{}_archive_{stamp}", self.service);
        let inner_path = self.root.join(format!("{base}.tar.gz"));
        let outer_path = self.root.join(format!("{base}_wrapped.tar.gz"));

        if let Err(e) = build_archive(&inner_path, &old_files) {
            // Leave the originals untouched for the next cycle
            let _ = std::fs::remove_file(&inner_path);
            return Err(e);
        }

        for path in &old_files {
            if let Err(e) = std::fs::remove_file(path) {
                warn!("failed to remove archived log {}: {e}", path.display());
            }
        }

        if let Err(e) = build_archive(&outer_path, &[inner_path.clone()]) {
            // The inner archive still holds the data; keep it
            let _ = std::fs::remove_file(&outer_path);
            return Err(e);
        }
        std::fs::remove_file(&inner_path)?;

        info!(
            "archived {} aged log files into {}",
            old_files.len(),
            outer_path.display()
        );
        Ok(old_files.len())
    }

    /// Spawn a background thread running `sweep` every `interval` until the
    /// stop flag is set. The flag is observed at 100 ms granularity.
    pub fn spawn_periodic(self, interval: Duration, stop: Arc<AtomicBool>) -> JoinHandle<()> {
        std::thread::spawn(move || {
            info!(
                "retention sweeper started for {}, interval {:?}",
                self.service, interval
            );
            while !stop.load(Ordering::Relaxed) {
                let mut waited = Duration::ZERO;
                while waited < interval && !stop.load(Ordering::Relaxed) {
                    let slice = Duration::from_millis(100).min(interval - waited);
                    std::thread::sleep(slice);
                    waited += slice;
                }
                if stop.load(Ordering::Relaxed) {
                    break;
                }
                if let Err(e) = self.sweep() {
                    error!("retention sweep error for {}: {e}", self.service);
                }
            }
            info!("retention sweeper stopped for {}", self.service);
        })
    }

    /// Gather persisted `.log` files older than the cutoff: the bucketed
    /// tree under `{root}/{service}/` plus rolled hourly files at the root.
    fn collect_old_files(&self, cutoff: DateTime<Local>) -> Result<Vec<PathBuf>, SweepError> {
        let mut old = Vec::new();

        let service_dir = self.root.join(&self.service);
        if service_dir.is_dir() {
            collect_logs_recursive(&service_dir, cutoff, &mut old)?;
        }

        if self.root.is_dir() {
            // Only rolled hourly files qualify; the live companion file may
            // be held open by a writer and stays out of the sweep.
            let rolled_prefix = format!("{}_hourly.log.", self.service);
            for entry in std::fs::read_dir(&self.root)? {
                let entry = entry?;
                let path = entry.path();
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if path.is_file()
                    && name.starts_with(rolled_prefix.as_str())
                    && is_older_than(&path, cutoff)?
                {
                    old.push(path);
                }
            }
        }

        old.sort();
        Ok(old)
    }
}

fn collect_logs_recursive(
    dir: &Path,
    cutoff: DateTime<Local>,
    out: &mut Vec<PathBuf>,
) -> Result<(), SweepError> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_logs_recursive(&path, cutoff, out)?;
        } else if path.extension().and_then(|e| e.to_str()) == Some("log")
            && is_older_than(&path, cutoff)?
        {
            out.push(path);
        }
    }
    Ok(())
}

fn is_older_than(path: &Path, cutoff: DateTime<Local>) -> Result<bool, SweepError> {
    let modified: DateTime<Local> = std::fs::metadata(path)?.modified()?.into();
    Ok(modified < cutoff)
}

fn build_archive(archive_path: &Path, files: &[PathBuf]) -> Result<(), SweepError> {
    let file = File::create(archive_path)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);

    for path in files {
        let name = path
            .file_name()
            .ok_or_else(|| std::io::Error::other("archive source has no file name"))?;
        builder.append_path_with_name(path, name)?;
    }

    builder.into_inner()?.finish()?;
    Ok(())
}

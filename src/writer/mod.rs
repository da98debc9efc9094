use crate::config::Config;
use crate::domain::LogEntry;
use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde_json::Value;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Entry serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Why a rotation is about to happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RotationCause {
    /// First open, or the hour bucket moved on. Resets the suffix.
    NewBucket,
    /// The handle was closed but the bucket is unchanged. Keeps the suffix.
    Reopen,
    /// The current file grew past the size threshold. Advances the suffix.
    SizeExceeded,
}

/// Mutable rotation state, owned exclusively by one writer and mutated only
/// under its lock.
struct RotationState {
    file: Option<File>,
    hourly_file: Option<File>,
    bucket: Option<String>,
    suffix: char,
    size: u64,
}

impl RotationState {
    fn new() -> Self {
        Self {
            file: None,
            hourly_file: None,
            bucket: None,
            suffix: 'a',
            size: 0,
        }
    }
}

/// Append-only log writer with hour-bucket and size-triggered rotation.
///
/// The whole rotate-then-write sequence runs under one lock, so entries from
/// concurrent producers land in the file in `write()` invocation order.
/// After 26 same-hour size rotations the suffix wraps 'z' back to 'a' and
/// the new file appends to its predecessor; this aliasing is the documented
/// capacity policy, not an error.
pub struct RotatingFileWriter {
    service: String,
    root: PathBuf,
    max_bytes: u64,
    structured: bool,
    tags: Vec<String>,
    state: Mutex<RotationState>,
}

impl RotatingFileWriter {
    pub fn new(service: impl Into<String>, config: &Config) -> Self {
        Self::with_max_bytes(service, config, config.max_file_size_bytes())
    }

    /// Construct with an explicit byte threshold instead of the config's
    /// megabyte-derived one. The facade always goes through [`Self::new`].
    pub fn with_max_bytes(service: impl Into<String>, config: &Config, max_bytes: u64) -> Self {
        Self {
            service: service.into(),
            root: config.log_dir.clone(),
            max_bytes,
            structured: config.structured_format,
            tags: config.tags.clone(),
            state: Mutex::new(RotationState::new()),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Open the current target file eagerly. Equivalent to a forced rotation
    /// into the current hour bucket.
    pub fn open(&self) -> Result<(), PersistenceError> {
        let bucket = bucket_for(Local::now());
        let mut state = self.state.lock();
        self.rotate_locked(&mut state, &bucket, RotationCause::NewBucket)
    }

    /// Format and append one entry, rotating first if needed.
    pub fn write(&self, entry: &LogEntry) -> Result<(), PersistenceError> {
        self.write_at(entry, &bucket_for(Local::now()))
    }

    pub(crate) fn write_at(&self, entry: &LogEntry, bucket: &str) -> Result<(), PersistenceError> {
        let mut state = self.state.lock();

        if let Some(cause) = evaluate_rotation(&state, bucket, self.max_bytes) {
            self.rotate_locked(&mut state, bucket, cause)?;
        }

        let line = self.format_entry(entry)?;
        let file = state
            .file
            .as_mut()
            .ok_or_else(|| std::io::Error::other("log file not open after rotation"))?;
        file.write_all(line.as_bytes())?;
        file.flush()?;
        state.size += line.len() as u64;

        // The hourly companion file is best-effort; the bucketed file above
        // is the authoritative copy.
        if let Some(hourly) = state.hourly_file.as_mut()
            && let Err(e) = hourly.write_all(line.as_bytes()).and_then(|()| hourly.flush())
        {
            warn!("hourly log write failed for {}: {e}", self.service);
        }

        Ok(())
    }

    /// Close the current file handles. The next write reopens.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.file = None;
        state.hourly_file = None;
    }

    fn rotate_locked(
        &self,
        state: &mut RotationState,
        bucket: &str,
        cause: RotationCause,
    ) -> Result<(), PersistenceError> {
        state.file = None;

        match cause {
            RotationCause::NewBucket => state.suffix = 'a',
            RotationCause::Reopen => {}
            RotationCause::SizeExceeded => state.suffix = advance_suffix(state.suffix),
        }

        let dir = self.root.join(&self.service).join(bucket);
        std::fs::create_dir_all(&dir)?;
        let path = log_file_path(&dir, &self.service, bucket, state.suffix);

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        // Restart-safe append: seed the size counter from what is already
        // on disk.
        state.size = file.metadata()?.len();

        if cause != RotationCause::SizeExceeded {
            self.roll_hourly_file(state, bucket)?;
        }

        debug!(
            "rotated {} to {} ({cause:?}, {} bytes existing)",
            self.service,
            path.display(),
            state.size
        );

        state.bucket = Some(bucket.to_string());
        state.file = Some(file);
        Ok(())
    }

    /// Maintain the always-present `{service}_hourly.log` companion: on an
    /// hour change the previous hour's content is renamed aside under its
    /// bucket and a fresh file is started.
    fn roll_hourly_file(
        &self,
        state: &mut RotationState,
        bucket: &str,
    ) -> Result<(), PersistenceError> {
        state.hourly_file = None;
        let hourly_path = self.root.join(format!("{}_hourly.log", self.service));

        if let Some(previous_bucket) = state.bucket.as_deref()
            && previous_bucket != bucket
            && hourly_path.exists()
        {
            let rolled = self
                .root
                .join(format!("{}_hourly.log.{previous_bucket}", self.service));
            if let Err(e) = std::fs::rename(&hourly_path, &rolled) {
                warn!("failed to roll hourly log for {}: {e}", self.service);
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&hourly_path)?;
        state.hourly_file = Some(file);
        Ok(())
    }

    /// Render an entry to its persisted line.
    ///
    /// Structured entries are always a single JSON object with `timestamp`
    /// and `service` injected when absent, plus configured tags. Text
    /// entries follow the configured format: a JSON object in structured
    /// mode, a timestamp-prefixed plain line otherwise.
    fn format_entry(&self, entry: &LogEntry) -> Result<String, PersistenceError> {
        let line = match entry {
            LogEntry::Structured(fields) => self.json_line(fields.clone())?,
            LogEntry::Text(message) if self.structured => {
                let mut record = serde_json::Map::new();
                record.insert("message".to_string(), Value::from(message.clone()));
                self.json_line(record)?
            }
            LogEntry::Text(message) => {
                format!("{} {message}\n", Local::now().to_rfc3339())
            }
        };
        Ok(line)
    }

    fn json_line(&self, mut record: serde_json::Map<String, Value>) -> Result<String, PersistenceError> {
        record
            .entry("timestamp")
            .or_insert_with(|| Value::from(Local::now().to_rfc3339()));
        record
            .entry("service")
            .or_insert_with(|| Value::from(self.service.clone()));
        if !self.tags.is_empty() {
            record
                .entry("tags")
                .or_insert_with(|| Value::from(self.tags.clone()));
        }
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');
        Ok(line)
    }
}

/// Directory bucket for an instant, derived from the hour.
pub(crate) fn bucket_for(now: DateTime<Local>) -> String {
    now.format("%Y%m%d%H").to_string()
}

/// Next rotation suffix: 'a'..'z' wrapping back to 'a'.
pub(crate) fn advance_suffix(current: char) -> char {
    if current < 'z' {
        (current as u8 + 1) as char
    } else {
        'a'
    }
}

fn log_file_path(dir: &Path, service: &str, bucket: &str, suffix: char) -> PathBuf {
    dir.join(format!("{service}_{bucket}_{suffix}.log"))
}

fn evaluate_rotation(state: &RotationState, bucket: &str, max_bytes: u64) -> Option<RotationCause> {
    match state.bucket.as_deref() {
        None => Some(RotationCause::NewBucket),
        Some(current) if current != bucket => Some(RotationCause::NewBucket),
        Some(_) if state.file.is_none() => Some(RotationCause::Reopen),
        Some(_) if state.size >= max_bytes => Some(RotationCause::SizeExceeded),
        Some(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;
    use tempfile::TempDir;

    fn writer_with(max_bytes: u64, structured: bool) -> (RotatingFileWriter, TempDir) {
        let dir = TempDir::new().unwrap();
        let config = Config {
            log_dir: dir.path().to_path_buf(),
            structured_format: structured,
            ..Config::default()
        };
        (
            RotatingFileWriter::with_max_bytes("testsvc", &config, max_bytes),
            dir,
        )
    }

    fn bucketed_files(root: &Path) -> Vec<PathBuf> {
        let mut files = Vec::new();
        let service_dir = root.join("testsvc");
        for bucket in std::fs::read_dir(service_dir).unwrap() {
            let bucket = bucket.unwrap().path();
            for file in std::fs::read_dir(bucket).unwrap() {
                files.push(file.unwrap().path());
            }
        }
        files.sort();
        files
    }

    #[test]
    fn test_advance_suffix_steps_and_wraps() {
        assert_eq!(advance_suffix('a'), 'b');
        assert_eq!(advance_suffix('y'), 'z');
        assert_eq!(advance_suffix('z'), 'a');

        // 26 advances starting at 'a' return to 'a'
        let mut suffix = 'a';
        for _ in 0..26 {
            suffix = advance_suffix(suffix);
        }
        assert_eq!(suffix, 'a');
    }

    #[test]
    fn test_size_rotation_advances_suffix_per_file() {
        let (writer, dir) = writer_with(16, false);
        // Each line is well over 16 bytes, so every write after the first
        // rotates once.
        for i in 0..3 {
            writer
                .write_at(&LogEntry::text(format!("message number {i}")), "2026010112")
                .unwrap();
        }

        let files = bucketed_files(dir.path());
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec![
                "testsvc_2026010112_a.log",
                "testsvc_2026010112_b.log",
                "testsvc_2026010112_c.log"
            ]
        );
    }

    #[test]
    fn test_hour_change_resets_suffix() {
        let (writer, dir) = writer_with(16, false);
        // Rotate past 'a' within the first bucket
        writer.write_at(&LogEntry::text("a long first message"), "2026010112").unwrap();
        writer.write_at(&LogEntry::text("a long second message"), "2026010112").unwrap();

        // Crossing the hour boundary resets to 'a' regardless of prior suffix
        writer.write_at(&LogEntry::text("new hour"), "2026010113").unwrap();

        let names: Vec<String> = bucketed_files(dir.path())
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert!(names.contains(&"testsvc_2026010112_b.log".to_string()));
        assert!(names.contains(&"testsvc_2026010113_a.log".to_string()));
    }

    #[test]
    fn test_suffix_wraps_to_a_within_one_hour() {
        let (writer, dir) = writer_with(8, false);
        // First write opens 'a'; 26 more size rotations wrap back onto 'a'
        for i in 0..27 {
            writer
                .write_at(&LogEntry::text(format!("rotation {i}")), "2026010112")
                .unwrap();
        }

        let files = bucketed_files(dir.path());
        // 26 distinct suffixes, with 'a' reused by the wrap
        assert_eq!(files.len(), 26);
        let reused = dir
            .path()
            .join("testsvc/2026010112/testsvc_2026010112_a.log");
        let content = std::fs::read_to_string(reused).unwrap();
        assert!(content.contains("rotation 0"));
        assert!(content.contains("rotation 26"));
    }

    #[test]
    fn test_restart_safe_append_seeds_size() {
        let (writer, dir) = writer_with(1024, false);
        writer.write_at(&LogEntry::text("before restart"), "2026010112").unwrap();
        writer.close();

        // A fresh writer over the same directory appends to the same file
        let config = Config {
            log_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        let reopened = RotatingFileWriter::with_max_bytes("testsvc", &config, 1024);
        reopened.write_at(&LogEntry::text("after restart"), "2026010112").unwrap();

        let path = dir
            .path()
            .join("testsvc/2026010112/testsvc_2026010112_a.log");
        let content = std::fs::read_to_string(path).unwrap();
        assert!(content.contains("before restart"));
        assert!(content.contains("after restart"));

        let size = reopened.state.lock().size;
        assert_eq!(size, content.len() as u64);
    }

    #[test]
    fn test_structured_entries_get_timestamp_and_service_injected() {
        let (writer, dir) = writer_with(1024 * 1024, true);
        for i in 0..5 {
            let mut fields = Map::new();
            fields.insert("event".to_string(), Value::from("probe"));
            fields.insert("sequence".to_string(), Value::from(i));
            writer
                .write_at(&LogEntry::structured(fields), "2026010112")
                .unwrap();
        }

        let path = dir
            .path()
            .join("testsvc/2026010112/testsvc_2026010112_a.log");
        let content = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 5);

        for (i, line) in lines.iter().enumerate() {
            let record: serde_json::Value = serde_json::from_str(line).unwrap();
            assert_eq!(record["event"], "probe");
            assert_eq!(record["sequence"], i as u64);
            assert_eq!(record["service"], "testsvc");
            assert!(record["timestamp"].is_string());
        }
    }

    #[test]
    fn test_existing_timestamp_and_service_are_preserved() {
        let (writer, dir) = writer_with(1024 * 1024, true);
        let entry = LogEntry::structured_from([
            ("timestamp", Value::from("2020-01-01T00:00:00+00:00")),
            ("service", Value::from("upstream")),
        ]);
        writer.write_at(&entry, "2026010112").unwrap();

        let path = dir
            .path()
            .join("testsvc/2026010112/testsvc_2026010112_a.log");
        let content = std::fs::read_to_string(path).unwrap();
        let record: serde_json::Value = serde_json::from_str(content.trim()).unwrap();
        assert_eq!(record["timestamp"], "2020-01-01T00:00:00+00:00");
        assert_eq!(record["service"], "upstream");
    }

    #[test]
    fn test_tags_injected_into_structured_entries() {
        let dir = TempDir::new().unwrap();
        let config = Config {
            log_dir: dir.path().to_path_buf(),
            structured_format: true,
            tags: vec!["env:prod".to_string(), "version:1.2".to_string()],
            ..Config::default()
        };
        let writer = RotatingFileWriter::new("testsvc", &config);
        writer
            .write_at(
                &LogEntry::structured_from([("event", Value::from("tagged"))]),
                "2026010112",
            )
            .unwrap();

        let path = dir
            .path()
            .join("testsvc/2026010112/testsvc_2026010112_a.log");
        let record: serde_json::Value =
            serde_json::from_str(std::fs::read_to_string(path).unwrap().trim()).unwrap();
        assert_eq!(record["tags"], serde_json::json!(["env:prod", "version:1.2"]));
    }

    #[test]
    fn test_text_entries_are_timestamp_prefixed() {
        let (writer, dir) = writer_with(1024 * 1024, false);
        writer.write_at(&LogEntry::text("plain message"), "2026010112").unwrap();

        let path = dir
            .path()
            .join("testsvc/2026010112/testsvc_2026010112_a.log");
        let content = std::fs::read_to_string(path).unwrap();
        let line = content.trim();
        assert!(line.ends_with("plain message"));
        // The prefix parses back as a timestamp
        let prefix = line.split_whitespace().next().unwrap();
        assert!(DateTime::parse_from_rfc3339(prefix).is_ok());
    }

    #[test]
    fn test_hourly_companion_file_receives_entries() {
        let (writer, dir) = writer_with(1024 * 1024, false);
        writer.write_at(&LogEntry::text("first"), "2026010112").unwrap();
        writer.write_at(&LogEntry::text("second"), "2026010112").unwrap();

        let hourly = dir.path().join("testsvc_hourly.log");
        let content = std::fs::read_to_string(hourly).unwrap();
        assert!(content.contains("first"));
        assert!(content.contains("second"));
    }

    #[test]
    fn test_hourly_file_rolls_on_hour_change() {
        let (writer, dir) = writer_with(1024 * 1024, false);
        writer.write_at(&LogEntry::text("old hour"), "2026010112").unwrap();
        writer.write_at(&LogEntry::text("new hour"), "2026010113").unwrap();

        let rolled = dir.path().join("testsvc_hourly.log.2026010112");
        assert!(rolled.exists());
        assert!(std::fs::read_to_string(rolled).unwrap().contains("old hour"));

        let current = dir.path().join("testsvc_hourly.log");
        let content = std::fs::read_to_string(current).unwrap();
        assert!(content.contains("new hour"));
        assert!(!content.contains("old hour"));
    }

    #[test]
    fn test_write_to_unwritable_directory_fails() {
        let config = Config {
            log_dir: PathBuf::from("/proc/frakt-definitely-invalid"),
            ..Config::default()
        };
        let writer = RotatingFileWriter::new("testsvc", &config);
        let result = writer.write(&LogEntry::text("doomed"));
        assert!(matches!(result, Err(PersistenceError::Io(_))));
    }
}

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("File error: {0}")]
    FileError(#[from] std::io::Error),
    #[error("JSON parse error: {0}")]
    JsonParseError(#[from] serde_json::Error),
    #[error("YAML parse error: {0}")]
    YamlParseError(#[from] serde_yaml::Error),
    #[error("Unsupported config format '{0}': use .json, .yaml, or .yml")]
    UnsupportedFormat(String),
}

/// Severity threshold carried by the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warning => "WARNING",
            Level::Error => "ERROR",
            Level::Critical => "CRITICAL",
        }
    }
}

impl From<Level> for tracing::Level {
    fn from(level: Level) -> Self {
        match level {
            Level::Debug => tracing::Level::DEBUG,
            Level::Info => tracing::Level::INFO,
            Level::Warning => tracing::Level::WARN,
            // tracing has no CRITICAL; ERROR is the closest severity
            Level::Error | Level::Critical => tracing::Level::ERROR,
        }
    }
}

/// Immutable, validated logger configuration.
///
/// Constructed once and shared; changing settings means building a new
/// `Config`. Loading from a file defaults absent keys and ignores unknown
/// ones, but explicit invalid values always fail construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory under which per-service log trees are created
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Severity threshold for console echo
    #[serde(default = "default_level")]
    pub level: Level,

    /// Number of entries a Worker accumulates before pushing a batch
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Size threshold per log file before suffix rotation, in megabytes
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,

    /// Capacity of the in-memory retry buffer for failed entries
    #[serde(default = "default_max_error_buffer")]
    pub max_error_buffer: usize,

    /// Age in days beyond which log files are archived and removed
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Tags injected into every structured entry
    #[serde(default)]
    pub tags: Vec<String>,

    /// Persist entries as JSON objects instead of plain timestamped lines
    #[serde(default)]
    pub structured_format: bool,

    /// Echo every formatted line to the console channel
    #[serde(default = "default_true")]
    pub console_enabled: bool,
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_level() -> Level {
    Level::Debug
}

fn default_buffer_size() -> usize {
    100
}

fn default_max_file_size_mb() -> u64 {
    10
}

fn default_max_error_buffer() -> usize {
    250
}

fn default_retention_days() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            level: default_level(),
            buffer_size: default_buffer_size(),
            max_file_size_mb: default_max_file_size_mb(),
            max_error_buffer: default_max_error_buffer(),
            retention_days: default_retention_days(),
            tags: Vec::new(),
            structured_format: false,
            console_enabled: true,
        }
    }
}

impl Config {
    /// Load a configuration from a JSON or YAML file, selected by extension.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();

        let config: Config = match ext.as_str() {
            "json" => serde_json::from_str(&content)?,
            "yaml" | "yml" => serde_yaml::from_str(&content)?,
            other => return Err(ConfigError::UnsupportedFormat(other.to_string())),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the record; invalid values fail construction, never clamp.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.log_dir.as_os_str().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "log_dir must not be empty".to_string(),
            ));
        }

        if self.max_file_size_mb == 0 {
            return Err(ConfigError::InvalidConfig(
                "max_file_size_mb must be greater than 0".to_string(),
            ));
        }

        if self.max_error_buffer == 0 {
            return Err(ConfigError::InvalidConfig(
                "max_error_buffer must be greater than 0".to_string(),
            ));
        }

        if self.retention_days == 0 {
            return Err(ConfigError::InvalidConfig(
                "retention_days must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Size threshold in bytes derived from `max_file_size_mb`.
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb * 1024 * 1024
    }
}

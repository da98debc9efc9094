//! Process-wide logger registry: one Local logger instance per service
//! name, created on first use with the registry's default configuration.

use super::{Logger, LoggerError};
use crate::config::{Config, ConfigError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, LazyLock};

static LOGGERS: LazyLock<Mutex<HashMap<String, Arc<Logger>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

static DEFAULT_CONFIG: LazyLock<Mutex<Config>> = LazyLock::new(|| Mutex::new(Config::default()));

/// Replace the configuration used for loggers created after this call.
/// Existing loggers keep the configuration they were built with.
pub fn configure(config: Config) -> Result<(), ConfigError> {
    config.validate()?;
    *DEFAULT_CONFIG.lock() = config;
    Ok(())
}

/// Load the registry default configuration from a JSON or YAML file.
pub fn configure_from_file<P: AsRef<Path>>(path: P) -> Result<(), ConfigError> {
    let config = Config::from_file(path)?;
    *DEFAULT_CONFIG.lock() = config;
    Ok(())
}

/// Fetch the Local logger for `service`, creating it on first request.
///
/// Construction happens under the registry lock, so two racing callers
/// observe the same instance.
pub fn get_logger(service: &str) -> Result<Arc<Logger>, LoggerError> {
    let mut loggers = LOGGERS.lock();
    if let Some(logger) = loggers.get(service) {
        return Ok(logger.clone());
    }

    let config = DEFAULT_CONFIG.lock().clone();
    let logger = Arc::new(Logger::local(service, config)?);
    loggers.insert(service.to_string(), logger.clone());
    Ok(logger)
}

/// Stop and forget every registered logger. Meant for process shutdown.
pub fn shutdown_all() {
    let drained: Vec<Arc<Logger>> = LOGGERS.lock().drain().map(|(_, logger)| logger).collect();
    for logger in drained {
        logger.stop();
    }
}

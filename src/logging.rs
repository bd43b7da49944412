//! Logging setup.
//!
//! The crate logs through the `log` facade; this module wires the facade to
//! `env_logger` with a global level and optional per-module overrides taken
//! from [`LogConfig`]. `RUST_LOG`, when set, is applied on top.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

static INITIALIZED: AtomicBool = AtomicBool::new(false);

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("logging system already initialized")]
    AlreadyInitialized,

    #[error("invalid log level '{0}'")]
    InvalidLevel(String),

    #[error("failed to install logger: {0}")]
    Install(String),
}

/// Log level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default level: TRACE, DEBUG, INFO, WARN, ERROR or OFF
    pub level: String,
    /// Per-module level overrides keyed by module path
    pub modules: HashMap<String, String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            modules: HashMap::new(),
        }
    }
}

impl LogConfig {
    pub fn validate(&self) -> Result<(), LoggingError> {
        parse_level(&self.level)?;
        for level in self.modules.values() {
            parse_level(level)?;
        }
        Ok(())
    }
}

/// Parse a level name, case-insensitively.
pub fn parse_level(level: &str) -> Result<log::LevelFilter, LoggingError> {
    match level.to_ascii_uppercase().as_str() {
        "TRACE" => Ok(log::LevelFilter::Trace),
        "DEBUG" => Ok(log::LevelFilter::Debug),
        "INFO" => Ok(log::LevelFilter::Info),
        "WARN" => Ok(log::LevelFilter::Warn),
        "ERROR" => Ok(log::LevelFilter::Error),
        "OFF" => Ok(log::LevelFilter::Off),
        _ => Err(LoggingError::InvalidLevel(level.to_string())),
    }
}

/// Install the global logger. Can only succeed once per process.
pub fn init_logging(config: &LogConfig) -> Result<(), LoggingError> {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return Err(LoggingError::AlreadyInitialized);
    }

    let mut builder = env_logger::Builder::new();
    builder.filter_level(parse_level(&config.level)?);
    for (module, level) in &config.modules {
        builder.filter_module(module, parse_level(level)?);
    }
    if let Ok(spec) = std::env::var("RUST_LOG") {
        builder.parse_filters(&spec);
    }

    builder
        .try_init()
        .map_err(|e| LoggingError::Install(e.to_string()))
}

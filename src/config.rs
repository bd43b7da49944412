//! Configuration for a dynamodel instance.
//!
//! Configuration is read from TOML. Every field has a default so an empty file
//! is a valid configuration.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::logging::LogConfig;
use crate::storage::SledStore;

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// IO-related errors (file access, permissions, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing errors
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation errors
    #[error("Configuration validation error: {0}")]
    Validation(String),

    /// The configured storage could not be opened
    #[error("Storage error: {0}")]
    Storage(String),
}

impl ConfigError {
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Directory of the sled database
    pub storage_path: PathBuf,
    /// Directory scanned for `*.json` schema configs
    pub schemas_dir: PathBuf,
    /// Open the database as temporary (removed on drop)
    pub temporary: bool,
    /// Page size used when a request does not specify one
    pub default_page_size: usize,
    /// Entity ids starting with this character are rejected
    pub reserved_marker: char,
    pub logging: LogConfig,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            storage_path: PathBuf::from("data"),
            schemas_dir: PathBuf::from("schemas"),
            temporary: false,
            default_page_size: 25,
            reserved_marker: crate::schema::DEFAULT_RESERVED_MARKER,
            logging: LogConfig::default(),
        }
    }
}

impl ModelConfig {
    /// Create a configuration with the given storage path and defaults elsewhere.
    pub fn new(storage_path: PathBuf) -> Self {
        Self {
            storage_path,
            ..Default::default()
        }
    }

    /// Set the schema directory
    pub fn with_schemas_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.schemas_dir = dir.into();
        self
    }

    /// Use a temporary database
    pub fn temporary(mut self) -> Self {
        self.temporary = true;
        self
    }

    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: ModelConfig = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a configuration file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())?;
        let mut config = Self::from_toml_str(&content)?;

        // Relative paths are resolved against the config file's directory.
        if let Some(base) = path.as_ref().parent() {
            if config.storage_path.is_relative() {
                config.storage_path = base.join(&config.storage_path);
            }
            if config.schemas_dir.is_relative() {
                config.schemas_dir = base.join(&config.schemas_dir);
            }
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_page_size == 0 {
            return Err(ConfigError::validation("default_page_size must be greater than 0"));
        }
        if self.reserved_marker.is_alphanumeric() {
            return Err(ConfigError::validation(format!(
                "reserved_marker '{}' must not be alphanumeric",
                self.reserved_marker
            )));
        }
        self.logging
            .validate()
            .map_err(|e| ConfigError::validation(e.to_string()))?;
        Ok(())
    }

    /// Open the sled store described by this configuration.
    pub fn open_store(&self) -> Result<SledStore, ConfigError> {
        let db = sled::Config::new()
            .path(&self.storage_path)
            .temporary(self.temporary)
            .open()
            .map_err(|e| ConfigError::Storage(e.to_string()))?;
        Ok(SledStore::new(db))
    }
}

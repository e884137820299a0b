//! Configuration file parsing for the Router.
//!
//! Loads settings from TOML files: bind address, database location and the
//! default log filter.

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

/// Router configuration error
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse config TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// Missing required field
    #[error("Missing required configuration field: {0}")]
    MissingField(String),
}

/// Router configuration loaded from TOML
#[derive(Debug, Clone, Deserialize)]
pub struct RouterConfig {
    /// Bind address (e.g., "127.0.0.1")
    pub bind_address: String,

    /// Bind port (e.g., 8080)
    pub bind_port: u16,

    /// SQLite database file, or ":memory:"
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Log filter used when `RUST_LOG` is not set (default: "info")
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_database_path() -> String {
    "gridscale.db".to_string()
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl RouterConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: RouterConfig = toml::from_str(&contents)?;

        if config.database_path.trim().is_empty() {
            return Err(ConfigError::MissingField("database_path".to_string()));
        }

        Ok(config)
    }

    /// Create a default configuration for testing
    pub fn default_test_config() -> Self {
        RouterConfig {
            bind_address: "127.0.0.1".to_string(),
            bind_port: 8080,
            database_path: ":memory:".to_string(),
            log_filter: default_log_filter(),
        }
    }

    /// Get the full bind address (address:port)
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.bind_port)
    }
}

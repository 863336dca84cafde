//! Configuration structures for deserialisation.
//!
//! These structures map directly to the JSON configuration file format.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Smallest accepted `server.max_message_bytes`.
pub const MIN_MESSAGE_BYTES: usize = 1024;

/// Root configuration structure.
///
/// This is the top-level structure that matches the JSON config file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Optional JSON schema reference (ignored during parsing).
    #[serde(rename = "$schema", default)]
    _schema: Option<String>,

    /// Optional comment field (ignored during parsing).
    #[serde(rename = "_comment", default)]
    _comment: Option<String>,

    /// Catalog storage settings.
    #[serde(default)]
    pub store: StoreConfig,

    /// Poster image settings.
    #[serde(default)]
    pub posters: PostersConfig,

    /// Server loop settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any validation checks fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.shutdown_timeout_secs == 0 {
            return Err(ConfigError::ValidationError {
                message: "server.shutdown_timeout_secs must be greater than 0".to_string(),
            });
        }

        if self.server.max_message_bytes < MIN_MESSAGE_BYTES {
            return Err(ConfigError::ValidationError {
                message: format!(
                    "server.max_message_bytes must be at least {MIN_MESSAGE_BYTES}, got {}",
                    self.server.max_message_bytes
                ),
            });
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError {
                message: format!(
                    "Invalid log level '{}'. Must be one of: {}",
                    self.logging.level,
                    valid_levels.join(", ")
                ),
            });
        }
        Ok(())
    }
}

/// Catalog storage configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// JSON snapshot the catalog is loaded from and saved to.
    /// Default: none (the catalog lives only in memory)
    #[serde(default)]
    pub data_file: Option<PathBuf>,
}

/// Poster image configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PostersConfig {
    /// Directory poster locations are resolved against.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

/// Server loop configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Seconds outstanding requests get to finish on shutdown.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    /// Largest accepted message in bytes.
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
}

impl ServerConfig {
    /// Shutdown timeout as a [`Duration`].
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            max_message_bytes: default_max_message_bytes(),
        }
    }
}

const fn default_shutdown_timeout_secs() -> u64 {
    10
}

const fn default_max_message_bytes() -> usize {
    1024 * 1024
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

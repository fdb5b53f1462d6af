//! Error types for infrastructure operations

use std::path::PathBuf;
use thiserror::Error;

/// Result type for infrastructure operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while loading configuration or setting up logging
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// The configuration file could not be read
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML for the expected shape
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// A global tracing subscriber was already installed
    #[error("Logging already initialized: {0}")]
    LoggingInit(String),
}

impl Error {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

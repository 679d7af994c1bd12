//! Configuration error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("failed to extract configuration: {0}")]
    Extract(#[from] Box<figment::Error>),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

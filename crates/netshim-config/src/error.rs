//! Configuration error types

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found at {path}")]
    NotFound { path: PathBuf },

    #[error("Failed to parse TOML config: {source}")]
    ParseError { source: toml::de::Error },

    #[error("Failed to merge configuration: {0}")]
    MergeError(String),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

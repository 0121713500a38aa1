//! Field configuration errors

use thiserror::Error;

/// Errors that can occur when loading a field configuration
///
/// Only [`ConfigError::Json`] and [`ConfigError::InvalidShape`] abort a load.
/// Entry-level problems are logged and the entry is skipped.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Text is not valid JSON
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Document or `ports` has the wrong shape
    #[error("Invalid configuration: {0}")]
    InvalidShape(String),

    /// Position is not a non-negative integer
    #[error("Invalid field position '{0}'")]
    InvalidIndex(String),

    /// A field entry could not be read
    #[error("Invalid field entry for {port}[{index}]: {message}")]
    InvalidEntry {
        /// Port the entry belongs to
        port: String,
        /// Position as written in the config
        index: String,
        /// What was wrong
        message: String,
    },
}

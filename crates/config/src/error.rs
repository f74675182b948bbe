//! Configuration error types.

use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse KDL document: {0}")]
    Parse(String),

    #[error("Missing required field '{field}' in '{node}' block")]
    MissingField { node: String, field: String },

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Invalid hostname pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

use thiserror::Error;

use crate::capture::codec::CodecError;
use crate::capture::filter::FilterError;
use crate::decode::registry::RuleError;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    /// Error from I/O operations
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Error from JSON serialization/deserialization
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// The listening socket could not be bound
    #[error("Failed to listen on {addr}: {source}")]
    BindError {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The real server could not be reached for an accepted client
    #[error("Failed to connect to {target}: {source}")]
    ConnectError {
        target: String,
        #[source]
        source: std::io::Error,
    },

    /// Error from filter compilation
    #[error("Filter error: {0}")]
    FilterError(#[from] FilterError),

    /// Malformed capture file
    #[error("Capture format error: {0}")]
    FormatError(#[from] CodecError),

    /// Malformed decode rule table
    #[error("Decode rule error: {0}")]
    RuleError(#[from] RuleError),

    /// Operation not allowed in the current state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Unknown connection or packet
    #[error("Not found: {0}")]
    NotFound(String),
}

/// Result type for application
pub type AppResult<T> = Result<T, AppError>;

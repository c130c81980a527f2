//! Error types for the segment matcher.
//!
//! Matching itself never fails: missing neighbours, short tracks and
//! sub-threshold segments all produce empty results. Errors only come from
//! configuration validation, the JSON message transport and the dispatcher.

use thiserror::Error;

/// Unified error type for segment-matcher operations.
#[derive(Debug, Error)]
pub enum MatchError {
    /// A configuration value is out of its valid range
    #[error("Configuration error: {message}")]
    InvalidConfig { message: String },

    /// A request or response could not be encoded/decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The background worker panicked or its channel closed
    #[error("Worker failed: {message}")]
    WorkerFailed { message: String },

    /// Neither the worker thread nor the inline fallback could run
    #[error("No execution path available for matching")]
    DispatchUnavailable,
}

/// Result type alias for segment-matcher operations.
pub type Result<T> = std::result::Result<T, MatchError>;

impl MatchError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        MatchError::InvalidConfig {
            message: message.into(),
        }
    }
}

//! Error types for driftwave-player
//!
//! Defines the engine error taxonomy using thiserror for clear error
//! propagation:
//! - transport errors surface as `Network` (fatal for the stream, no retry)
//! - engine-reported failures surface as `Protocol` (reject one request)
//! - expired requests surface as `Timeout` (same handling as `Protocol`)
//! - superseded work surfaces as `Canceled` (never an error event)

use std::time::Duration;
use thiserror::Error;

/// Main error type for driftwave-player
#[derive(Error, Debug)]
pub enum Error {
    /// Network transport errors (failed fetch, bad status)
    #[error("Network error: {0}")]
    Network(String),

    /// Decode engine reported failure for a specific request
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// No response arrived within the request timeout
    #[error("Request '{operation}' timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    /// Work superseded by a newer request or a reset; not a failure
    #[error("Canceled: {0}")]
    Canceled(String),

    /// Decode engine failure during load/init
    #[error("Decode error: {0}")]
    Decode(String),

    /// Operation invalid in the current player state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<driftwave_common::Error> for Error {
    fn from(err: driftwave_common::Error) -> Self {
        match err {
            driftwave_common::Error::Config(msg) => Error::Config(msg),
            driftwave_common::Error::Io(e) => Error::Io(e),
            driftwave_common::Error::InvalidInput(msg) => Error::InvalidState(msg),
        }
    }
}

impl Error {
    /// Whether this error represents superseded work rather than a failure
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Canceled(_))
    }
}

/// Convenience Result type using driftwave-player Error
pub type Result<T> = std::result::Result<T, Error>;

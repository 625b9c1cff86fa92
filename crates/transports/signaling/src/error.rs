//! Error types for the signaling layer

use thiserror::Error;

/// Result type alias for signaling operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while serving a signaling connection
#[derive(Debug, Error)]
pub enum Error {
    /// JSON (de)serialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The WebSocket went away or refused a frame
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Session coordinator rejected the operation
    #[error(transparent)]
    Core(#[from] roomcast_core::Error),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

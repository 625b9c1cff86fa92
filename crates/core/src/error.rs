//! Error types for the Roomcast session coordinator
//!
//! Every variant is recoverable at the operation boundary: the signaling layer
//! turns it into a structured error response for the calling connection.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for session coordinator operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by session coordinator operations
#[derive(Debug, Error)]
pub enum Error {
    /// The connection already has a registered participant
    #[error("Registration error: {0}")]
    Registration(String),

    /// Resource is not in the state or ownership the operation requires
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// The media engine could not allocate or negotiate
    #[error("Engine allocation error: {0}")]
    EngineAllocation(String),

    /// Capability mismatch or missing target at consumption time
    #[error("Cannot consume: {0}")]
    IncompatibleOrPrecondition(String),

    /// Identity does not resolve to a live resource
    #[error("Not found: {0}")]
    NotFound(String),

    /// Duplicate or out-of-order protocol call
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Wire-level name of an error category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    RegistrationError,
    PreconditionError,
    EngineAllocationError,
    IncompatibleOrPreconditionError,
    NotFoundError,
    InvalidStateError,
    ConfigError,
}

impl ErrorKind {
    /// Name used in structured error payloads
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::RegistrationError => "RegistrationError",
            ErrorKind::PreconditionError => "PreconditionError",
            ErrorKind::EngineAllocationError => "EngineAllocationError",
            ErrorKind::IncompatibleOrPreconditionError => "IncompatibleOrPreconditionError",
            ErrorKind::NotFoundError => "NotFoundError",
            ErrorKind::InvalidStateError => "InvalidStateError",
            ErrorKind::ConfigError => "ConfigError",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Registration(_) => ErrorKind::RegistrationError,
            Error::Precondition(_) => ErrorKind::PreconditionError,
            Error::EngineAllocation(_) => ErrorKind::EngineAllocationError,
            Error::IncompatibleOrPrecondition(_) => ErrorKind::IncompatibleOrPreconditionError,
            Error::NotFound(_) => ErrorKind::NotFoundError,
            Error::InvalidState(_) => ErrorKind::InvalidStateError,
            Error::InvalidConfig(_) => ErrorKind::ConfigError,
        }
    }

    /// Check if the caller may retry the same request unchanged
    ///
    /// Only engine allocation failures (e.g. port exhaustion) are transient.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::EngineAllocation(_))
    }
}

/// Errors raised inside the media engine seam
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// No resources left (ports, workers)
    #[error("allocation failed: {0}")]
    Allocation(String),

    /// Handle does not exist in the engine
    #[error("unknown engine handle: {0}")]
    UnknownHandle(String),

    /// Engine refused the parameters
    #[error("rejected: {0}")]
    Rejected(String),

    /// Engine process is gone
    #[error("media engine unavailable: {0}")]
    Unavailable(String),
}

impl From<EngineError> for Error {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::UnknownHandle(h) => Error::NotFound(format!("engine handle {}", h)),
            other => Error::EngineAllocation(other.to_string()),
        }
    }
}

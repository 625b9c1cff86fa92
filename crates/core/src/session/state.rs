//! Lifecycle state machines for transports and consumptions
//!
//! State only moves through [`TransportState::apply`] and
//! [`ConsumptionState::apply`]; callers never assign a state directly.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Connection state of a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportState {
    /// Allocated, waiting for the client's handshake completion
    New,
    /// Handshake submitted to the engine
    Connecting,
    /// Engine confirmed the handshake
    Connected,
    /// Engine rejected the handshake; teardown follows
    Failed,
    /// Released
    Closed,
}

/// Inputs driving the transport state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent {
    ConnectRequested,
    EngineConfirmed,
    EngineFailed,
    Close,
}

/// Inputs driving the consumption state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumptionEvent {
    Resume,
    Close,
}

/// State of a consumption
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsumptionState {
    Paused,
    Active,
    Closed,
}

/// Rejected state transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: String,
    pub event: String,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot apply {} in state {}", self.event, self.from)
    }
}

impl std::error::Error for InvalidTransition {}

impl TransportState {
    /// Transition function
    ///
    /// `new -> connecting -> connected | failed`, and any state except
    /// `closed` may close.
    pub fn apply(self, event: TransportEvent) -> Result<TransportState, InvalidTransition> {
        use TransportEvent::*;
        use TransportState::*;

        match (self, event) {
            (New, ConnectRequested) => Ok(Connecting),
            (Connecting, EngineConfirmed) => Ok(Connected),
            (Connecting, EngineFailed) => Ok(Failed),
            (Closed, Close) => Err(self.reject(event)),
            (_, Close) => Ok(Closed),
            _ => Err(self.reject(event)),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TransportState::Failed | TransportState::Closed)
    }

    fn reject(self, event: TransportEvent) -> InvalidTransition {
        InvalidTransition {
            from: self.to_string(),
            event: format!("{:?}", event),
        }
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportState::New => "new",
            TransportState::Connecting => "connecting",
            TransportState::Connected => "connected",
            TransportState::Failed => "failed",
            TransportState::Closed => "closed",
        };
        f.write_str(name)
    }
}

impl ConsumptionState {
    /// Initial state: video starts paused until the first key frame lines up
    pub fn initial(paused: bool) -> Self {
        if paused {
            ConsumptionState::Paused
        } else {
            ConsumptionState::Active
        }
    }

    /// Transition function; resuming an active consumption is a no-op
    pub fn apply(self, event: ConsumptionEvent) -> Result<ConsumptionState, InvalidTransition> {
        match (self, event) {
            (ConsumptionState::Closed, _) => Err(InvalidTransition {
                from: self.to_string(),
                event: format!("{:?}", event),
            }),
            (_, ConsumptionEvent::Resume) => Ok(ConsumptionState::Active),
            (_, ConsumptionEvent::Close) => Ok(ConsumptionState::Closed),
        }
    }

    pub fn is_paused(&self) -> bool {
        matches!(self, ConsumptionState::Paused)
    }
}

impl fmt::Display for ConsumptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConsumptionState::Paused => "paused",
            ConsumptionState::Active => "active",
            ConsumptionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

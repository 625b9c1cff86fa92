//! Signaling lifecycle events
//!
//! Embedders that want to observe the coordinator (dashboards, audit logs)
//! pass an event sender into [`SharedState`](super::SharedState). Nothing in
//! the request path waits on a listener being present.

use roomcast_core::{ErrorKind, MediaKind, ParticipantId, ProductionId};

/// Events emitted by the WebSocket signaling handler
#[derive(Debug, Clone, PartialEq)]
pub enum SignalingEvent {
    /// A connection was accepted and registered
    ParticipantJoined {
        participant_id: ParticipantId,
        timestamp_ns: u64,
    },

    /// A participant's resources were torn down
    ParticipantLeft {
        participant_id: ParticipantId,
        /// Optional reason (e.g. "socket closed")
        reason: Option<String>,
    },

    /// A production was announced to the other participants
    ProductionAnnounced {
        production_id: ProductionId,
        participant_id: ParticipantId,
        kind: MediaKind,
        /// Number of participants the announcement was queued for
        recipients: usize,
    },

    /// A request failed
    Error {
        code: ErrorKind,
        message: String,
        participant_id: Option<ParticipantId>,
    },
}

impl SignalingEvent {
    pub fn participant_joined(participant_id: ParticipantId) -> Self {
        Self::ParticipantJoined {
            participant_id,
            timestamp_ns: current_timestamp_ns(),
        }
    }

    pub fn participant_left(participant_id: ParticipantId, reason: Option<String>) -> Self {
        Self::ParticipantLeft {
            participant_id,
            reason,
        }
    }

    pub fn production_announced(
        production_id: ProductionId,
        participant_id: ParticipantId,
        kind: MediaKind,
        recipients: usize,
    ) -> Self {
        Self::ProductionAnnounced {
            production_id,
            participant_id,
            kind,
            recipients,
        }
    }

    pub fn error(code: ErrorKind, message: String, participant_id: Option<ParticipantId>) -> Self {
        Self::Error {
            code,
            message,
            participant_id,
        }
    }

    /// Get the event name for logging/debugging
    pub fn name(&self) -> &'static str {
        match self {
            Self::ParticipantJoined { .. } => "participant_joined",
            Self::ParticipantLeft { .. } => "participant_left",
            Self::ProductionAnnounced { .. } => "production_announced",
            Self::Error { .. } => "error",
        }
    }
}

/// Get current timestamp in nanoseconds
pub fn current_timestamp_ns() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

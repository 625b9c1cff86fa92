//! Server-initiated notifications
//!
//! The coordinator pushes these into each participant's outbox. Turning them
//! into wire frames is the signaling layer's job.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::capabilities::MediaKind;
use crate::ids::{ConsumptionId, ParticipantId, ProductionId};

/// Bounded per-participant notification channel
pub type Outbox = mpsc::Sender<Notification>;

/// Receiving half handed to the connection writer
pub type OutboxReceiver = mpsc::Receiver<Notification>;

/// Notification delivered to one participant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "camelCase")]
pub enum Notification {
    /// A production became consumable
    #[serde(rename_all = "camelCase")]
    NewProducer {
        production_id: ProductionId,
        participant_id: ParticipantId,
        kind: MediaKind,
    },

    /// A production ended and the bound consumption is gone
    #[serde(rename_all = "camelCase")]
    ProducerClosed {
        production_id: ProductionId,
        consumption_id: ConsumptionId,
    },
}

impl Notification {
    /// Wire method name
    pub fn method(&self) -> &'static str {
        match self {
            Notification::NewProducer { .. } => "newProducer",
            Notification::ProducerClosed { .. } => "producerClosed",
        }
    }
}

/// Create a participant outbox with the given capacity
pub fn outbox(capacity: usize) -> (Outbox, OutboxReceiver) {
    mpsc::channel(capacity.max(1))
}

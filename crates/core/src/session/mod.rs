//! Session state
//!
//! [`Session`] owns every participant, transport, production and consumption.
//! Each resource lives in its own keyed map with its own lock, so requests
//! against different participants never contend. Handlers share one
//! `Arc<Session>`.
//!
//! Lock order: transport lifecycle lock, then consumption state lock, then the
//! short synchronous set locks (participant resources, transport attachments,
//! production consumers). At most one synchronous lock is held at a time.

mod consumption;
mod participant;
mod production;
mod transport;

pub mod notification;
pub mod state;

pub use consumption::ConsumptionDescriptor;
pub use notification::{outbox, Notification, Outbox, OutboxReceiver};
pub use participant::ParticipantEntry;
pub use production::ProductionInfo;
pub use state::{ConsumptionEvent, ConsumptionState, InvalidTransition, TransportEvent, TransportState};
pub use transport::TransportDescriptor;

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;

use crate::capabilities::{CapabilityNegotiator, CapabilitySet};
use crate::config::{SessionConfig, WebRtcTransportConfig};
use crate::engine::MediaEngine;
use crate::ids::{ConnectionId, ConsumptionId, ParticipantId, ProductionId, ProductionIdAllocator, TransportId};

use consumption::ConsumptionEntry;
use production::ProductionEntry;
use transport::TransportEntry;

/// Point-in-time resource counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub participants: usize,
    pub transports: usize,
    pub productions: usize,
    pub consumptions: usize,
}

/// Session signaling coordinator
pub struct Session {
    negotiator: CapabilityNegotiator,
    engine: Arc<dyn MediaEngine>,
    transport_config: WebRtcTransportConfig,
    production_ids: ProductionIdAllocator,
    participants: DashMap<ParticipantId, Arc<ParticipantEntry>>,
    connections: DashMap<ConnectionId, ParticipantId>,
    transports: DashMap<TransportId, Arc<TransportEntry>>,
    productions: DashMap<ProductionId, Arc<ProductionEntry>>,
    consumptions: DashMap<ConsumptionId, Arc<ConsumptionEntry>>,
}

impl Session {
    pub fn new(
        config: &SessionConfig,
        negotiator: CapabilityNegotiator,
        engine: Arc<dyn MediaEngine>,
    ) -> Self {
        Self {
            negotiator,
            engine,
            transport_config: config.webrtc_transport.clone(),
            production_ids: ProductionIdAllocator::new(),
            participants: DashMap::new(),
            connections: DashMap::new(),
            transports: DashMap::new(),
            productions: DashMap::new(),
            consumptions: DashMap::new(),
        }
    }

    /// Relay-wide capability set; pure, no side effects
    pub fn capabilities(&self) -> &CapabilitySet {
        self.negotiator.capabilities()
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            participants: self.participants.len(),
            transports: self.transports.len(),
            productions: self.productions.len(),
            consumptions: self.consumptions.len(),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("engine", &self.engine.name())
            .field("stats", &self.stats())
            .finish()
    }
}

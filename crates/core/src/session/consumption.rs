//! Consumption Manager
//!
//! Binds a production's stream to a participant's subscribe transport. The
//! compatibility check fails closed, and the new consumption is registered
//! with its participant, its transport and its source production in that
//! order; losing a race at any step rolls the binding back.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use super::state::{ConsumptionEvent, ConsumptionState, TransportState};
use super::transport::TransportEntry;
use super::Session;
use crate::capabilities::{can_consume, CapabilitySet, MediaKind, RtpParameters};
use crate::engine::{ConsumerType, TransportDirection};
use crate::error::EngineError;
use crate::ids::{ConsumptionId, EngineHandle, ParticipantId, ProductionId, TransportId};
use crate::{Error, Result};

/// Simulcast layers requested for new simulcast consumers
const PREFERRED_SPATIAL_LAYER: u8 = 2;
const PREFERRED_TEMPORAL_LAYER: u8 = 2;

#[derive(Debug)]
pub(crate) struct ConsumptionEntry {
    pub id: ConsumptionId,
    pub owner: ParticipantId,
    pub transport: TransportId,
    pub production: ProductionId,
    pub engine: EngineHandle,
    pub state: AsyncMutex<ConsumptionState>,
}

/// Result of `consume`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumptionDescriptor {
    pub consumption_id: ConsumptionId,
    pub production_id: ProductionId,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
    #[serde(rename = "type")]
    pub consumer_type: ConsumerType,
    pub producer_paused: bool,
    pub paused: bool,
}

fn unusable(reason: impl Into<String>) -> Error {
    Error::IncompatibleOrPrecondition(reason.into())
}

impl Session {
    /// Create a consumption of `production_id` for the caller
    ///
    /// With no `transport_id`, the caller's connected subscribe transport is
    /// used. Video starts paused, audio starts active. The submitted
    /// capabilities are stored as the caller's receive capabilities.
    pub async fn create_consumption(
        &self,
        participant_id: ParticipantId,
        transport_id: Option<TransportId>,
        production_id: ProductionId,
        rtp_capabilities: CapabilitySet,
    ) -> Result<ConsumptionDescriptor> {
        let participant = self
            .participant(&participant_id)
            .ok_or_else(|| unusable(format!("participant {} not registered", participant_id)))?;
        participant.set_rtp_capabilities(rtp_capabilities.clone());

        let transport = match transport_id {
            Some(id) => self
                .transport_entry(&id)
                .ok_or_else(|| unusable(format!("transport {} does not exist", id)))?,
            None => self.subscribe_transport_of(participant.transport_ids()).await?,
        };

        if transport.owner != participant_id {
            return Err(unusable(format!(
                "transport {} is not owned by {}",
                transport.id, participant_id
            )));
        }
        if transport.direction != TransportDirection::Subscribe {
            return Err(unusable(format!(
                "transport {} is not a subscribe transport",
                transport.id
            )));
        }

        // Held until the consumption is fully registered
        let state = transport.lifecycle.lock().await;
        if *state != TransportState::Connected {
            return Err(unusable(format!(
                "transport {} is {}, not connected",
                transport.id, *state
            )));
        }

        let production = self
            .production_entry(&production_id)
            .ok_or_else(|| unusable(format!("production {} does not exist", production_id)))?;

        if !can_consume(&production.rtp_parameters, &rtp_capabilities)
            || !self.engine.can_consume(production.engine, &rtp_capabilities)
        {
            return Err(unusable(format!(
                "capabilities cannot consume production {}",
                production_id
            )));
        }

        let paused = production.kind == MediaKind::Video;
        let consumer = self
            .engine
            .consume(transport.engine, production.engine, &rtp_capabilities, paused)
            .await
            .map_err(|e| match e {
                EngineError::UnknownHandle(_) | EngineError::Rejected(_) => unusable(e.to_string()),
                other => Error::EngineAllocation(other.to_string()),
            })?;

        if consumer.consumer_type == ConsumerType::Simulcast {
            if let Err(e) = self
                .engine
                .set_preferred_layers(consumer.handle, PREFERRED_SPATIAL_LAYER, PREFERRED_TEMPORAL_LAYER)
                .await
            {
                warn!(%production_id, error = %e, "Failed to set preferred simulcast layers");
            }
        }

        let consumption_id = ConsumptionId::new();
        self.consumptions.insert(
            consumption_id,
            Arc::new(ConsumptionEntry {
                id: consumption_id,
                owner: participant_id,
                transport: transport.id,
                production: production_id,
                engine: consumer.handle,
                state: AsyncMutex::new(ConsumptionState::initial(paused)),
            }),
        );

        if let Err(e) = participant.attach(|r| {
            r.consumptions.insert(consumption_id);
        }) {
            self.remove_consumption(consumption_id).await;
            return Err(e);
        }

        transport.attached.lock().consumptions.insert(consumption_id);

        let bound = {
            let mut consumers = production.consumers.lock();
            if consumers.closed {
                false
            } else {
                consumers.ids.insert(consumption_id);
                true
            }
        };
        if !bound {
            self.remove_consumption(consumption_id).await;
            return Err(unusable(format!("production {} has ended", production_id)));
        }
        drop(state);

        info!(
            %participant_id,
            transport_id = %transport.id,
            %production_id,
            %consumption_id,
            kind = %production.kind,
            paused,
            "Consumption created"
        );

        Ok(ConsumptionDescriptor {
            consumption_id,
            production_id,
            kind: production.kind,
            rtp_parameters: consumer.rtp_parameters,
            consumer_type: consumer.consumer_type,
            producer_paused: consumer.producer_paused,
            paused,
        })
    }

    /// Start media flowing on a paused consumption
    ///
    /// Resuming an active consumption succeeds without doing anything. A
    /// consumption that no longer exists yields `NotFoundError`.
    pub async fn resume(&self, participant_id: ParticipantId, consumption_id: ConsumptionId) -> Result<()> {
        let consumption = self
            .consumptions
            .get(&consumption_id)
            .map(|c| c.value().clone())
            .ok_or_else(|| Error::NotFound(format!("consumption {}", consumption_id)))?;
        if consumption.owner != participant_id {
            return Err(Error::Precondition(format!(
                "consumption {} is not owned by {}",
                consumption_id, participant_id
            )));
        }

        let mut state = consumption.state.lock().await;
        match *state {
            ConsumptionState::Closed => {
                return Err(Error::NotFound(format!("consumption {}", consumption_id)));
            }
            ConsumptionState::Active => return Ok(()),
            ConsumptionState::Paused => {}
        }

        self.engine
            .resume_consumer(consumption.engine)
            .await
            .map_err(|e| match e {
                EngineError::UnknownHandle(_) => Error::NotFound(format!("consumption {}", consumption_id)),
                other => Error::EngineAllocation(other.to_string()),
            })?;

        *state = state
            .apply(ConsumptionEvent::Resume)
            .map_err(|e| Error::NotFound(e.to_string()))?;
        debug!(%participant_id, %consumption_id, "Consumption resumed");
        Ok(())
    }

    /// Current state of a consumption, `None` once it has been released
    pub async fn consumption_state(&self, consumption_id: &ConsumptionId) -> Option<ConsumptionState> {
        let consumption = self.consumptions.get(consumption_id).map(|c| c.value().clone())?;
        let state = *consumption.state.lock().await;
        Some(state)
    }

    /// Deregister a consumption exactly once
    ///
    /// Returns the entry when this call removed it. Does not notify; callers
    /// that end a production notify after all deregistration is done.
    pub(crate) async fn remove_consumption(&self, consumption_id: ConsumptionId) -> Option<Arc<ConsumptionEntry>> {
        let (_, consumption) = self.consumptions.remove(&consumption_id)?;

        {
            let mut state = consumption.state.lock().await;
            if let Ok(next) = state.apply(ConsumptionEvent::Close) {
                *state = next;
            }
        }

        if let Some(transport) = self.transport_entry(&consumption.transport) {
            transport.attached.lock().consumptions.remove(&consumption_id);
        }
        if let Some(production) = self.production_entry(&consumption.production) {
            production.consumers.lock().ids.remove(&consumption_id);
        }
        if let Some(owner) = self.participant(&consumption.owner) {
            owner.detach(|r| {
                r.consumptions.remove(&consumption_id);
            });
        }

        if let Err(e) = self.engine.close_consumer(consumption.engine).await {
            debug!(%consumption_id, error = %e, "Engine consumer already gone");
        }

        debug!(
            %consumption_id,
            participant_id = %consumption.owner,
            production_id = %consumption.production,
            "Consumption removed"
        );
        Some(consumption)
    }

    /// The caller's subscribe transport, used when `consume` names none
    async fn subscribe_transport_of(&self, transport_ids: Vec<TransportId>) -> Result<Arc<TransportEntry>> {
        let mut fallback = None;
        for id in transport_ids {
            let Some(transport) = self.transport_entry(&id) else {
                continue;
            };
            if transport.direction != TransportDirection::Subscribe {
                continue;
            }
            if *transport.lifecycle.lock().await == TransportState::Connected {
                return Ok(transport);
            }
            fallback.get_or_insert(transport);
        }

        fallback.ok_or_else(|| unusable("no subscribe transport"))
    }
}

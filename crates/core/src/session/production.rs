//! Production Manager

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use super::notification::Notification;
use super::state::TransportState;
use super::Session;
use crate::capabilities::{validate_rtp_parameters, MediaKind, RtpParameters};
use crate::engine::TransportDirection;
use crate::ids::{ConsumptionId, EngineHandle, ParticipantId, ProductionId, TransportId};
use crate::{Error, Result};

/// Consumptions bound to a production
///
/// `closed` is set, under the same lock, when the production ends; binding
/// after that point is refused so no consumption can outlive its source.
#[derive(Debug, Default)]
pub(crate) struct Consumers {
    pub closed: bool,
    pub ids: HashSet<ConsumptionId>,
}

#[derive(Debug)]
pub(crate) struct ProductionEntry {
    pub id: ProductionId,
    pub owner: ParticipantId,
    pub transport: TransportId,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
    pub engine: EngineHandle,
    pub consumers: parking_lot::Mutex<Consumers>,
}

/// Public view of a live production
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductionInfo {
    pub production_id: ProductionId,
    pub participant_id: ParticipantId,
    pub kind: MediaKind,
}

impl ProductionInfo {
    /// Discovery event announcing this production
    pub fn announcement(&self) -> Notification {
        Notification::NewProducer {
            production_id: self.production_id,
            participant_id: self.participant_id,
            kind: self.kind,
        }
    }
}

impl ProductionEntry {
    fn info(&self) -> ProductionInfo {
        ProductionInfo {
            production_id: self.id,
            participant_id: self.owner,
            kind: self.kind,
        }
    }
}

impl Session {
    /// Register a new outbound stream on a connected publish transport
    ///
    /// Preconditions are checked before anything is allocated, so a
    /// `PreconditionError` leaves no partial state. Announcing the production
    /// to other participants is the caller's job, once the response is out.
    pub async fn create_production(
        &self,
        participant_id: ParticipantId,
        transport_id: TransportId,
        kind: MediaKind,
        mut rtp_parameters: RtpParameters,
    ) -> Result<ProductionInfo> {
        let participant = self
            .participant(&participant_id)
            .ok_or_else(|| Error::Precondition(format!("participant {} not registered", participant_id)))?;
        let transport = self
            .transport_entry(&transport_id)
            .ok_or_else(|| Error::Precondition(format!("transport {} does not exist", transport_id)))?;

        if transport.owner != participant_id {
            return Err(Error::Precondition(format!(
                "transport {} is not owned by {}",
                transport_id, participant_id
            )));
        }
        if transport.direction != TransportDirection::Publish {
            return Err(Error::Precondition(format!(
                "transport {} is not a publish transport",
                transport_id
            )));
        }

        // Held until the production is fully registered
        let state = transport.lifecycle.lock().await;
        if *state != TransportState::Connected {
            return Err(Error::Precondition(format!(
                "transport {} is {}, not connected",
                transport_id, *state
            )));
        }

        validate_rtp_parameters(kind, &rtp_parameters, self.capabilities())?;
        self.negotiator.retain_supported(kind, &mut rtp_parameters);

        let handle = self
            .engine
            .produce(transport.engine, kind, &rtp_parameters)
            .await
            .map_err(|e| Error::EngineAllocation(e.to_string()))?;

        let production_id = self.production_ids.allocate();
        let entry = Arc::new(ProductionEntry {
            id: production_id,
            owner: participant_id,
            transport: transport_id,
            kind,
            rtp_parameters,
            engine: handle,
            consumers: parking_lot::Mutex::new(Consumers::default()),
        });

        self.productions.insert(production_id, Arc::clone(&entry));
        transport.attached.lock().productions.insert(production_id);

        if let Err(e) = participant.attach(|r| {
            r.productions.insert(production_id);
        }) {
            self.end_production_inner(production_id).await;
            return Err(e);
        }
        drop(state);

        info!(%participant_id, %transport_id, %production_id, %kind, "Production created");
        Ok(entry.info())
    }

    /// Tear down a production the caller owns
    ///
    /// Every bound consumption is deregistered, then its owner is told the
    /// production ended.
    pub async fn end_production(
        &self,
        participant_id: ParticipantId,
        production_id: ProductionId,
    ) -> Result<()> {
        let owner = self
            .productions
            .get(&production_id)
            .map(|p| p.owner)
            .ok_or_else(|| Error::NotFound(format!("production {}", production_id)))?;
        if owner != participant_id {
            return Err(Error::Precondition(format!(
                "production {} is not owned by {}",
                production_id, participant_id
            )));
        }

        if self.end_production_inner(production_id).await {
            Ok(())
        } else {
            Err(Error::NotFound(format!("production {}", production_id)))
        }
    }

    /// Snapshot of live productions, oldest first
    pub fn productions(&self) -> Vec<ProductionInfo> {
        let mut all: Vec<ProductionInfo> = self.productions.iter().map(|p| p.info()).collect();
        all.sort_by_key(|p| p.production_id);
        all
    }

    pub fn production(&self, production_id: &ProductionId) -> Option<ProductionInfo> {
        self.productions.get(production_id).map(|p| p.info())
    }

    pub(crate) fn production_entry(&self, production_id: &ProductionId) -> Option<Arc<ProductionEntry>> {
        self.productions.get(production_id).map(|p| p.value().clone())
    }

    /// End a production exactly once; returns false if it was already gone
    pub(crate) async fn end_production_inner(&self, production_id: ProductionId) -> bool {
        let Some((_, production)) = self.productions.remove(&production_id) else {
            return false;
        };

        let bound = {
            let mut consumers = production.consumers.lock();
            consumers.closed = true;
            std::mem::take(&mut consumers.ids)
        };

        if let Some(transport) = self.transport_entry(&production.transport) {
            transport.attached.lock().productions.remove(&production_id);
        }
        if let Some(owner) = self.participant(&production.owner) {
            owner.detach(|r| {
                r.productions.remove(&production_id);
            });
        }

        let mut ended = Vec::with_capacity(bound.len());
        for consumption_id in bound {
            if let Some(consumption) = self.remove_consumption(consumption_id).await {
                ended.push((consumption.owner, consumption_id));
            }
        }

        if let Err(e) = self.engine.close_producer(production.engine).await {
            debug!(%production_id, error = %e, "Engine producer already gone");
        }

        // Every identity below is deregistered by now
        for (owner, consumption_id) in ended {
            self.notify(
                &owner,
                Notification::ProducerClosed {
                    production_id,
                    consumption_id,
                },
            );
        }

        info!(
            %production_id,
            participant_id = %production.owner,
            "Production ended"
        );
        true
    }
}

//! Transport Lifecycle Manager
//!
//! Creates the publish/subscribe conduits, drives their handshake through the
//! engine and tears them down. Every state change of a transport happens while
//! holding its lifecycle lock, which is also what orders a pending connect
//! before a dependent produce or consume on the same transport.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use super::state::{TransportEvent, TransportState};
use super::Session;
use crate::engine::{
    DtlsParameters, HandshakeOutcome, IceCandidate, IceParameters, TransportDirection,
    TransportHints, TransportOptions,
};
use crate::ids::{ConsumptionId, EngineHandle, ParticipantId, ProductionId, TransportId};
use crate::{Error, Result};

/// Productions and consumptions running over a transport
#[derive(Debug, Default)]
pub(crate) struct Attached {
    pub productions: HashSet<ProductionId>,
    pub consumptions: HashSet<ConsumptionId>,
}

#[derive(Debug)]
pub(crate) struct TransportEntry {
    pub id: TransportId,
    pub owner: ParticipantId,
    pub direction: TransportDirection,
    pub engine: EngineHandle,
    pub lifecycle: AsyncMutex<TransportState>,
    pub attached: parking_lot::Mutex<Attached>,
}

/// Handshake parameters returned by `createTransport`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportDescriptor {
    pub transport_id: TransportId,
    pub direction: TransportDirection,
    pub ice_parameters: IceParameters,
    pub ice_candidates: Vec<IceCandidate>,
    pub dtls_parameters: DtlsParameters,
}

impl Session {
    /// Allocate a transport in state `new`
    ///
    /// Engine allocation failures are reported, not retried.
    pub async fn create_transport(
        &self,
        participant_id: ParticipantId,
        direction: TransportDirection,
        hints: TransportHints,
    ) -> Result<TransportDescriptor> {
        let participant = self.require_participant(&participant_id)?;

        let options = TransportOptions {
            listen_ips: self.transport_config.listen_ips.clone(),
            enable_udp: self.transport_config.enable_udp,
            enable_tcp: self.transport_config.enable_tcp,
            prefer_udp: self.transport_config.prefer_udp,
            initial_available_outgoing_bitrate: self
                .transport_config
                .initial_available_outgoing_bitrate,
            hints,
        };

        let allocated = self
            .engine
            .create_transport(direction, &options)
            .await
            .map_err(|e| Error::EngineAllocation(e.to_string()))?;

        if let Some(bitrate) = self.transport_config.max_incoming_bitrate {
            if let Err(e) = self
                .engine
                .set_max_incoming_bitrate(allocated.handle, bitrate)
                .await
            {
                debug!(error = %e, "Ignoring failure to cap incoming bitrate");
            }
        }

        let transport_id = TransportId::new();
        let entry = Arc::new(TransportEntry {
            id: transport_id,
            owner: participant_id,
            direction,
            engine: allocated.handle,
            lifecycle: AsyncMutex::new(TransportState::New),
            attached: parking_lot::Mutex::new(Attached::default()),
        });
        self.transports.insert(transport_id, Arc::clone(&entry));

        if let Err(e) = participant.attach(|r| {
            r.transports.insert(transport_id);
        }) {
            self.teardown_transport(&entry).await;
            return Err(e);
        }

        info!(%participant_id, %transport_id, %direction, "Transport created");

        Ok(TransportDescriptor {
            transport_id,
            direction,
            ice_parameters: allocated.ice_parameters,
            ice_candidates: allocated.ice_candidates,
            dtls_parameters: allocated.dtls_parameters,
        })
    }

    /// Feed the client's handshake completion to the engine
    ///
    /// A second call on the same transport fails with `InvalidStateError`. An
    /// engine failure moves the transport to `failed` and tears it down before
    /// returning `EngineAllocationError`.
    pub async fn connect_transport(
        &self,
        participant_id: ParticipantId,
        transport_id: TransportId,
        dtls_parameters: DtlsParameters,
    ) -> Result<()> {
        let transport = self
            .transport_entry(&transport_id)
            .ok_or_else(|| Error::NotFound(format!("transport {}", transport_id)))?;
        if transport.owner != participant_id {
            return Err(Error::Precondition(format!(
                "transport {} is not owned by {}",
                transport_id, participant_id
            )));
        }

        let mut state = transport.lifecycle.lock().await;
        *state = match state.apply(TransportEvent::ConnectRequested) {
            Ok(next) => next,
            Err(_) if *state == TransportState::Closed => {
                return Err(Error::NotFound(format!("transport {}", transport_id)));
            }
            Err(e) => return Err(Error::InvalidState(e.to_string())),
        };

        let outcome = self
            .engine
            .connect_transport(transport.engine, &dtls_parameters)
            .await;

        let reason = match outcome {
            Ok(HandshakeOutcome::Connected) => {
                *state = state
                    .apply(TransportEvent::EngineConfirmed)
                    .map_err(|e| Error::InvalidState(e.to_string()))?;
                info!(%participant_id, %transport_id, "Transport connected");
                return Ok(());
            }
            Ok(HandshakeOutcome::Failed(reason)) => reason,
            Err(e) => e.to_string(),
        };

        *state = state
            .apply(TransportEvent::EngineFailed)
            .map_err(|e| Error::InvalidState(e.to_string()))?;
        warn!(%participant_id, %transport_id, %reason, "Transport handshake failed");

        self.close_locked(&transport, &mut state).await;
        Err(Error::EngineAllocation(format!(
            "handshake failed for transport {}: {}",
            transport_id, reason
        )))
    }

    /// Explicitly close one of the caller's transports
    pub async fn close_transport(
        &self,
        participant_id: ParticipantId,
        transport_id: TransportId,
    ) -> Result<()> {
        let transport = self
            .transport_entry(&transport_id)
            .ok_or_else(|| Error::NotFound(format!("transport {}", transport_id)))?;
        if transport.owner != participant_id {
            return Err(Error::Precondition(format!(
                "transport {} is not owned by {}",
                transport_id, participant_id
            )));
        }

        self.teardown_transport(&transport).await;
        Ok(())
    }

    /// Current state of a transport, `None` once it has been released
    pub async fn transport_state(&self, transport_id: &TransportId) -> Option<TransportState> {
        let transport = self.transport_entry(transport_id)?;
        let state = *transport.lifecycle.lock().await;
        Some(state)
    }

    pub(crate) fn transport_entry(&self, transport_id: &TransportId) -> Option<Arc<TransportEntry>> {
        self.transports.get(transport_id).map(|t| t.value().clone())
    }

    /// Close a transport from any path; waits for in-flight operations on it
    pub(crate) async fn teardown_transport(&self, transport: &Arc<TransportEntry>) {
        let mut state = transport.lifecycle.lock().await;
        self.close_locked(transport, &mut state).await;
    }

    /// Release a transport whose lifecycle lock the caller holds
    ///
    /// Consumptions and productions riding on it are ended first, so every
    /// notification goes out after the identities it names are deregistered.
    async fn close_locked(&self, transport: &Arc<TransportEntry>, state: &mut TransportState) {
        match state.apply(TransportEvent::Close) {
            Ok(next) => *state = next,
            Err(_) => return,
        }

        self.transports.remove(&transport.id);

        let attached = std::mem::take(&mut *transport.attached.lock());
        for consumption_id in attached.consumptions {
            self.remove_consumption(consumption_id).await;
        }
        for production_id in attached.productions {
            self.end_production_inner(production_id).await;
        }

        if let Some(owner) = self.participant(&transport.owner) {
            owner.detach(|r| {
                r.transports.remove(&transport.id);
            });
        }

        if let Err(e) = self.engine.close_transport(transport.engine).await {
            debug!(transport_id = %transport.id, error = %e, "Engine transport already gone");
        }

        info!(
            transport_id = %transport.id,
            participant_id = %transport.owner,
            "Transport closed"
        );
    }
}

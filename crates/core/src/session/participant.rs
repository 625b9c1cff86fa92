//! Participant Registry
//!
//! Maps participant identity to the resources it owns. Registration binds a
//! participant to exactly one client connection; unregistration is idempotent
//! and cascades teardown of every owned transport, production and consumption.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use super::notification::{Notification, Outbox};
use super::Session;
use crate::capabilities::CapabilitySet;
use crate::ids::{ConnectionId, ConsumptionId, ParticipantId, ProductionId, TransportId};
use crate::{Error, Result};

/// Resources a participant owns
///
/// Once `closed` is set nothing new may be attached; creators that lose this
/// race roll back their own resource.
#[derive(Debug, Default)]
pub(crate) struct OwnedResources {
    pub closed: bool,
    pub transports: HashSet<TransportId>,
    pub productions: HashSet<ProductionId>,
    pub consumptions: HashSet<ConsumptionId>,
}

/// A registered participant
#[derive(Debug)]
pub struct ParticipantEntry {
    pub id: ParticipantId,
    pub connection: ConnectionId,
    outbox: Outbox,
    rtp_capabilities: RwLock<Option<CapabilitySet>>,
    pub(crate) resources: Mutex<OwnedResources>,
}

impl ParticipantEntry {
    /// Receive capabilities the participant's device last declared
    pub fn rtp_capabilities(&self) -> Option<CapabilitySet> {
        self.rtp_capabilities.read().clone()
    }

    pub(crate) fn set_rtp_capabilities(&self, caps: CapabilitySet) {
        *self.rtp_capabilities.write() = Some(caps);
    }

    /// Push a notification without waiting
    ///
    /// A full or closed outbox drops the notification; returns whether it
    /// was queued.
    pub fn notify(&self, notification: Notification) -> bool {
        match self.outbox.try_send(notification) {
            Ok(()) => true,
            Err(TrySendError::Full(n)) => {
                warn!(
                    participant_id = %self.id,
                    method = n.method(),
                    "Outbox full, dropping notification"
                );
                false
            }
            Err(TrySendError::Closed(n)) => {
                debug!(
                    participant_id = %self.id,
                    method = n.method(),
                    "Outbox closed, dropping notification"
                );
                false
            }
        }
    }

    /// Attach an owned resource; fails once the participant is being torn down
    pub(crate) fn attach(&self, attach: impl FnOnce(&mut OwnedResources)) -> Result<()> {
        let mut resources = self.resources.lock();
        if resources.closed {
            return Err(Error::NotFound(format!("participant {} has left", self.id)));
        }
        attach(&mut resources);
        Ok(())
    }

    pub(crate) fn detach(&self, detach: impl FnOnce(&mut OwnedResources)) {
        detach(&mut self.resources.lock());
    }

    /// Transports the participant currently owns
    pub fn transport_ids(&self) -> Vec<TransportId> {
        self.resources.lock().transports.iter().copied().collect()
    }

    pub fn consumption_ids(&self) -> Vec<ConsumptionId> {
        self.resources.lock().consumptions.iter().copied().collect()
    }
}

impl Session {
    /// Register a participant bound to `connection`
    ///
    /// Fails with `RegistrationError` if the connection already has one.
    pub fn register(&self, connection: ConnectionId, outbox: Outbox) -> Result<ParticipantId> {
        use dashmap::mapref::entry::Entry;

        match self.connections.entry(connection) {
            Entry::Occupied(existing) => Err(Error::Registration(format!(
                "connection {} already registered as {}",
                connection,
                existing.get()
            ))),
            Entry::Vacant(slot) => {
                let id = ParticipantId::new();
                self.participants.insert(
                    id,
                    Arc::new(ParticipantEntry {
                        id,
                        connection,
                        outbox,
                        rtp_capabilities: RwLock::new(None),
                        resources: Mutex::new(OwnedResources::default()),
                    }),
                );
                slot.insert(id);
                info!(participant_id = %id, connection_id = %connection, "Participant registered");
                Ok(id)
            }
        }
    }

    /// Remove a participant and cascade teardown of everything it owns
    ///
    /// Idempotent: only the first call for an identity does any work. Returns
    /// whether this call performed the teardown.
    pub async fn unregister(&self, participant_id: ParticipantId) -> bool {
        let Some((_, participant)) = self.participants.remove(&participant_id) else {
            debug!(%participant_id, "Unregister for unknown participant ignored");
            return false;
        };
        self.connections
            .remove_if(&participant.connection, |_, id| *id == participant_id);

        let owned = {
            let mut resources = participant.resources.lock();
            let owned = std::mem::take(&mut *resources);
            resources.closed = true;
            owned
        };

        // Closing a transport waits for any in-flight operation on it
        let transports: Vec<_> = owned
            .transports
            .iter()
            .filter_map(|id| self.transport_entry(id))
            .collect();
        join_all(transports.iter().map(|t| self.teardown_transport(t))).await;

        for production_id in &owned.productions {
            self.end_production_inner(*production_id).await;
        }
        for consumption_id in &owned.consumptions {
            self.remove_consumption(*consumption_id).await;
        }

        info!(
            %participant_id,
            transports = owned.transports.len(),
            productions = owned.productions.len(),
            consumptions = owned.consumptions.len(),
            "Participant unregistered"
        );
        true
    }

    /// Look up a live participant
    pub fn participant(&self, participant_id: &ParticipantId) -> Option<Arc<ParticipantEntry>> {
        self.participants.get(participant_id).map(|p| p.value().clone())
    }

    /// Participant registered for a connection
    pub fn participant_for_connection(&self, connection: &ConnectionId) -> Option<ParticipantId> {
        self.connections.get(connection).map(|id| *id)
    }

    /// Deliver a notification to one participant
    pub fn notify(&self, participant_id: &ParticipantId, notification: Notification) -> bool {
        match self.participant(participant_id) {
            Some(participant) => participant.notify(notification),
            None => false,
        }
    }

    /// Deliver a notification to every participant except `except`
    ///
    /// Best effort per recipient. Returns how many outboxes accepted it.
    pub fn notify_all_except(&self, except: &ParticipantId, notification: &Notification) -> usize {
        let recipients: Vec<Arc<ParticipantEntry>> = self
            .participants
            .iter()
            .filter(|p| p.key() != except)
            .map(|p| Arc::clone(p.value()))
            .collect();

        recipients
            .iter()
            .filter(|p| p.notify(notification.clone()))
            .count()
    }

    pub(crate) fn require_participant(&self, participant_id: &ParticipantId) -> Result<Arc<ParticipantEntry>> {
        self.participant(participant_id)
            .ok_or_else(|| Error::NotFound(format!("participant {}", participant_id)))
    }
}

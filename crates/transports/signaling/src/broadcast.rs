//! Discovery fan-out
//!
//! Delivery is best-effort per recipient: a full or closed outbox is logged
//! inside the session and skipped, it never fails the producing request.

use roomcast_core::session::ProductionInfo;
use roomcast_core::{Notification, ParticipantId, Session};
use tracing::debug;

/// Announce a fresh production to every other registered participant
///
/// Returns how many participants the announcement was queued for.
pub fn announce_production(session: &Session, info: &ProductionInfo) -> usize {
    let recipients = session.notify_all_except(&info.participant_id, &info.announcement());
    debug!(
        production_id = %info.production_id,
        participant_id = %info.participant_id,
        recipients,
        "Announced production"
    );
    recipients
}

/// Synthetic discovery events for a participant that just connected
pub fn late_joiner_announcements(session: &Session, participant_id: ParticipantId) -> Vec<Notification> {
    session
        .productions()
        .into_iter()
        .filter(|info| info.participant_id != participant_id)
        .map(|info| info.announcement())
        .collect()
}

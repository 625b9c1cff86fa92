//! Request dispatch
//!
//! Maps each [`SignalingRequest`] onto one session coordinator call and shapes
//! the JSON result. Fan-out to other participants is left to the caller so it
//! can happen after the response has been written.

use roomcast_core::session::ProductionInfo;
use roomcast_core::{ParticipantId, Session};
use serde_json::{json, Value};
use tracing::debug;

use crate::protocol::SignalingRequest;

/// Outcome of a successful request
#[derive(Debug)]
pub struct Dispatched {
    /// JSON-RPC `result` payload
    pub result: Value,

    /// Production to announce to everyone else once the response is out
    pub announce: Option<ProductionInfo>,

    /// The participant asked to leave
    pub left: bool,
}

impl Dispatched {
    fn reply(result: Value) -> Self {
        Self {
            result,
            announce: None,
            left: false,
        }
    }
}

/// Run one request on behalf of `participant_id`
pub async fn dispatch(
    session: &Session,
    participant_id: ParticipantId,
    request: SignalingRequest,
) -> crate::Result<Dispatched> {
    debug!(%participant_id, method = request.method(), "Dispatching request");

    let dispatched = match request {
        SignalingRequest::GetCapabilities => {
            Dispatched::reply(serde_json::to_value(session.capabilities())?)
        }

        SignalingRequest::CreateTransport(p) => {
            let descriptor = session
                .create_transport(participant_id, p.direction, p.hints)
                .await?;
            Dispatched::reply(serde_json::to_value(descriptor)?)
        }

        SignalingRequest::ConnectTransport(p) => {
            session
                .connect_transport(participant_id, p.transport_id, p.dtls_parameters)
                .await?;
            Dispatched::reply(json!({}))
        }

        SignalingRequest::Produce(p) => {
            let info = session
                .create_production(participant_id, p.transport_id, p.kind, p.rtp_parameters)
                .await?;
            Dispatched {
                result: json!({ "productionId": info.production_id }),
                announce: Some(info),
                left: false,
            }
        }

        SignalingRequest::Consume(p) => {
            let descriptor = session
                .create_consumption(
                    participant_id,
                    p.transport_id,
                    p.production_id,
                    p.rtp_capabilities,
                )
                .await?;
            Dispatched::reply(serde_json::to_value(descriptor)?)
        }

        SignalingRequest::Resume(p) => {
            session.resume(participant_id, p.consumption_id).await?;
            Dispatched::reply(json!({}))
        }

        SignalingRequest::EndProduction(p) => {
            session.end_production(participant_id, p.production_id).await?;
            Dispatched::reply(json!({}))
        }

        SignalingRequest::CloseTransport(p) => {
            session.close_transport(participant_id, p.transport_id).await?;
            Dispatched::reply(json!({}))
        }

        SignalingRequest::Leave => {
            session.unregister(participant_id).await;
            Dispatched {
                result: json!({}),
                announce: None,
                left: true,
            }
        }
    };

    Ok(dispatched)
}

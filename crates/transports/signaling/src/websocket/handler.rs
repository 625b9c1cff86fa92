//! WebSocket message handler for JSON-RPC 2.0 signaling
//!
//! One task reads frames off the socket and spawns a task per request. A
//! writer task merges direct responses with the participant's notification
//! outbox, responses first.

use super::events::SignalingEvent;
use crate::broadcast::{announce_production, late_joiner_announcements};
use crate::dispatcher::dispatch;
use crate::protocol::{
    error_codes, JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    SignalingRequest,
};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use roomcast_core::session::{outbox, OutboxReceiver};
use roomcast_core::{ConnectionId, ErrorKind, ParticipantId, Session};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Shared state across all WebSocket connections
pub struct SharedState {
    pub session: Arc<Session>,
    /// Bound on each participant's outbox and response queue
    pub outbox_capacity: usize,
    /// Optional observer for lifecycle events
    pub event_tx: Option<mpsc::Sender<SignalingEvent>>,
}

impl SharedState {
    /// Create new shared state without event forwarding
    pub fn new(session: Arc<Session>, outbox_capacity: usize) -> Self {
        Self::new_with_events(session, outbox_capacity, None)
    }

    /// Create new shared state with optional event forwarding
    pub fn new_with_events(
        session: Arc<Session>,
        outbox_capacity: usize,
        event_tx: Option<mpsc::Sender<SignalingEvent>>,
    ) -> Self {
        Self {
            session,
            outbox_capacity: outbox_capacity.max(1),
            event_tx,
        }
    }

    /// Emit an event if event_tx is configured
    pub async fn emit_event(&self, event: SignalingEvent) {
        if let Some(ref tx) = self.event_tx {
            if let Err(e) = tx.send(event).await {
                warn!("Failed to emit signaling event: {}", e);
            }
        }
    }
}

/// Router serving the signaling WebSocket at `path`
pub fn signaling_router(state: Arc<SharedState>, path: &str) -> Router {
    Router::new()
        .route(path, get(upgrade))
        .with_state(state)
}

async fn upgrade(ws: WebSocketUpgrade, State(state): State<Arc<SharedState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Serve one signaling connection until the socket closes
pub async fn handle_socket(socket: WebSocket, state: Arc<SharedState>) {
    let connection = ConnectionId::new();
    let (outbox_tx, outbox_rx) = outbox(state.outbox_capacity);
    let participant_id = match state.session.register(connection, outbox_tx) {
        Ok(id) => id,
        Err(e) => {
            error!(%connection, "Failed to register participant: {}", e);
            return;
        }
    };
    info!(%participant_id, %connection, "Participant connected");
    state
        .emit_event(SignalingEvent::participant_joined(participant_id))
        .await;

    let (ws_tx, mut ws_rx) = socket.split();
    let (frames_tx, frames_rx) = mpsc::channel::<String>(state.outbox_capacity);

    // Welcome is queued before the writer starts so it is always the first frame
    match JsonRpcNotification::welcome(participant_id).to_json() {
        Ok(json) => {
            let _ = frames_tx.try_send(json);
        }
        Err(e) => error!(%participant_id, "Failed to encode welcome: {}", e),
    }

    let writer = tokio::spawn(write_frames(ws_tx, frames_rx, outbox_rx, participant_id));

    for announcement in late_joiner_announcements(&state.session, participant_id) {
        match JsonRpcNotification::from_core(&announcement).and_then(|n| n.to_json()) {
            Ok(json) => send_frame(&frames_tx, json).await,
            Err(e) => warn!(%participant_id, "Failed to encode announcement: {}", e),
        }
    }

    let mut requests = JoinSet::new();
    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                let state = Arc::clone(&state);
                let frames = frames_tx.clone();
                requests.spawn(async move {
                    handle_text(&state, participant_id, &text, &frames).await;
                });
            }
            Ok(Message::Binary(_)) => {
                let err = JsonRpcError::invalid_state(
                    "binary frames are not supported".to_string(),
                    Value::Null,
                );
                reply_error(&state, participant_id, &frames_tx, err).await;
            }
            Ok(Message::Close(_)) => {
                info!(%participant_id, "WebSocket connection closed by client");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                debug!(%participant_id, "WebSocket error: {}", e);
                break;
            }
        }

        while let Some(done) = requests.try_join_next() {
            if let Err(e) = done {
                error!(%participant_id, "Request task failed: {}", e);
            }
        }
    }

    // In-flight requests finish before teardown
    while let Some(done) = requests.join_next().await {
        if let Err(e) = done {
            error!(%participant_id, "Request task failed: {}", e);
        }
    }

    if state.session.unregister(participant_id).await {
        state
            .emit_event(SignalingEvent::participant_left(
                participant_id,
                Some("socket closed".to_string()),
            ))
            .await;
    }
    info!(%participant_id, "Participant disconnected");

    writer.abort();
}

async fn write_frames(
    mut sink: SplitSink<WebSocket, Message>,
    mut frames: mpsc::Receiver<String>,
    mut notifications: OutboxReceiver,
    participant_id: ParticipantId,
) {
    loop {
        let text = tokio::select! {
            biased;
            Some(frame) = frames.recv() => frame,
            Some(notification) = notifications.recv() => {
                match JsonRpcNotification::from_core(&notification).and_then(|n| n.to_json()) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!(%participant_id, "Failed to encode notification: {}", e);
                        continue;
                    }
                }
            }
            else => break,
        };

        if let Err(e) = sink.send(Message::Text(text)).await {
            debug!(%participant_id, "Failed to send WebSocket message: {}", e);
            break;
        }
    }
}

async fn send_frame(frames: &mpsc::Sender<String>, json: String) {
    if frames.send(json).await.is_err() {
        debug!("Connection writer is gone, dropping frame");
    }
}

async fn reply_error(
    state: &SharedState,
    participant_id: ParticipantId,
    frames: &mpsc::Sender<String>,
    err: JsonRpcError,
) {
    if let Some(kind) = err
        .error
        .data
        .as_ref()
        .and_then(|d| d.get("kind"))
        .and_then(|k| serde_json::from_value::<ErrorKind>(k.clone()).ok())
    {
        state
            .emit_event(SignalingEvent::error(
                kind,
                err.error.message.clone(),
                Some(participant_id),
            ))
            .await;
    }

    match err.to_json() {
        Ok(json) => send_frame(frames, json).await,
        Err(e) => error!(%participant_id, "Failed to encode error response: {}", e),
    }
}

/// Handle one text frame: parse, dispatch, respond, then fan out
async fn handle_text(
    state: &SharedState,
    participant_id: ParticipantId,
    text: &str,
    frames: &mpsc::Sender<String>,
) {
    let request: JsonRpcRequest = match serde_json::from_str(text) {
        Ok(req) => req,
        Err(e) => {
            warn!(%participant_id, "Malformed request: {}", e);
            let err = JsonRpcError::invalid_state(format!("malformed request: {}", e), Value::Null);
            reply_error(state, participant_id, frames, err).await;
            return;
        }
    };

    let id = request.id.clone().unwrap_or(Value::Null);
    let request = match SignalingRequest::from_rpc(request) {
        Ok(req) => req,
        Err(violation) => {
            warn!(%participant_id, "Rejected request: {}", violation);
            let err = JsonRpcError::invalid_state(violation.to_string(), id);
            reply_error(state, participant_id, frames, err).await;
            return;
        }
    };

    let method = request.method();
    match dispatch(&state.session, participant_id, request).await {
        Ok(dispatched) => {
            match JsonRpcResponse::new(dispatched.result, id).to_json() {
                Ok(json) => send_frame(frames, json).await,
                Err(e) => error!(%participant_id, method, "Failed to encode response: {}", e),
            }

            if let Some(info) = dispatched.announce {
                let recipients = announce_production(&state.session, &info);
                state
                    .emit_event(SignalingEvent::production_announced(
                        info.production_id,
                        info.participant_id,
                        info.kind,
                        recipients,
                    ))
                    .await;
            }

            if dispatched.left {
                info!(%participant_id, "Participant left");
                state
                    .emit_event(SignalingEvent::participant_left(
                        participant_id,
                        Some("leave".to_string()),
                    ))
                    .await;
            }
        }
        Err(crate::Error::Core(e)) => {
            warn!(%participant_id, method, kind = %e.kind(), "Request failed: {}", e);
            reply_error(state, participant_id, frames, JsonRpcError::from_core(&e, id)).await;
        }
        Err(e) => {
            error!(%participant_id, method, "Request failed: {}", e);
            let err = JsonRpcError::new(error_codes::INTERNAL_ERROR, e.to_string(), id);
            reply_error(state, participant_id, frames, err).await;
        }
    }
}

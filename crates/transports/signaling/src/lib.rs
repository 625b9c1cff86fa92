//! Roomcast Signaling - JSON-RPC 2.0 over WebSocket
//!
//! Exposes a [`roomcast_core::Session`] to browsers:
//!
//! - [`protocol`]: wire envelopes, error codes and typed request schemas
//! - [`dispatcher`]: one request in, one coordinator call, one result out
//! - [`broadcast`]: discovery fan-out and late-joiner announcements
//! - [`websocket`]: the axum endpoint and per-connection task
//!
//! # Example
//!
//! ```ignore
//! use roomcast_signaling::websocket::{signaling_router, SharedState};
//!
//! let state = Arc::new(SharedState::new(session, 256));
//! let app = signaling_router(state, "/server");
//! axum::serve(listener, app).await?;
//! ```

#![warn(clippy::all)]

pub mod broadcast;
pub mod dispatcher;
pub mod error;
pub mod protocol;
pub mod websocket;

pub use error::{Error, Result};
pub use protocol::{JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, SignalingRequest};
pub use websocket::{signaling_router, SharedState, SignalingEvent};

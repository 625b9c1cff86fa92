//! WebSocket signaling endpoint
//!
//! Browsers speak JSON-RPC 2.0 over a single WebSocket per participant. The
//! router returned by [`signaling_router`] can be merged into any axum app.

mod events;
mod handler;

pub use events::{current_timestamp_ns, SignalingEvent};
pub use handler::{handle_socket, signaling_router, SharedState};

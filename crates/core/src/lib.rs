//! Roomcast Core - Transport-agnostic session signaling coordinator
//!
//! Tracks which participants exist and which media transports, productions
//! and consumptions each of them owns, and enforces the ordering WebRTC
//! negotiation needs: capabilities, transport creation, DTLS connect,
//! produce/consume, resume.
//!
//! # Architecture
//!
//! - [`capabilities`]: relay codec set, compatibility checks, parameter validation
//! - [`engine`]: the [`MediaEngine`](engine::MediaEngine) seam and the in-process
//!   [`LoopbackEngine`](engine::LoopbackEngine)
//! - [`session`]: the [`Session`] coordinator with per-resource locking
//!
//! Wire protocols live in separate crates that hold an `Arc<Session>` and
//! forward [`Notification`]s to their clients.
//!
//! # Example
//!
//! ```ignore
//! use roomcast_core::{CapabilityNegotiator, LoopbackEngine, Session, SessionConfig};
//! use std::sync::Arc;
//!
//! let config = SessionConfig::default();
//! let negotiator = CapabilityNegotiator::new(&config.router.media_codecs)?;
//! let engine = Arc::new(LoopbackEngine::new(&config, &negotiator));
//! let session = Arc::new(Session::new(&config, negotiator, engine));
//!
//! let (tx, rx) = roomcast_core::session::outbox(64);
//! let participant = session.register(ConnectionId::new(), tx)?;
//! ```

#![warn(clippy::all)]

pub mod capabilities;
pub mod config;
pub mod engine;
pub mod error;
pub mod ids;
pub mod session;

pub use capabilities::{CapabilityNegotiator, CapabilitySet, MediaKind, RtpParameters};
pub use config::SessionConfig;
pub use engine::{LoopbackEngine, MediaEngine, TransportDirection};
pub use error::{EngineError, Error, ErrorKind, Result};
pub use ids::{ConnectionId, ConsumptionId, EngineHandle, ParticipantId, ProductionId, TransportId};
pub use session::{Notification, Session, SessionStats};

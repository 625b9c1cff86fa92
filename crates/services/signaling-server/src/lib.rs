//! Roomcast Server - HTTPS listener hosting the signaling endpoint
//!
//! The binary in `main.rs` wires these pieces together; they live in a
//! library so they can be tested without TLS material.

pub mod config;
pub mod http;

pub use config::{ConfigError, ServerConfig};
pub use http::build_router;

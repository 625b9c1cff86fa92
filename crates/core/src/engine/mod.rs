//! Media engine seam
//!
//! The coordinator never touches packets, ICE or DTLS itself. Everything
//! network-facing goes through [`MediaEngine`], which a real SFU binding or the
//! in-process [`LoopbackEngine`] implements.

mod loopback;

pub use loopback::LoopbackEngine;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::capabilities::{CapabilitySet, MediaKind, RtpParameters};
use crate::config::ListenIp;
use crate::error::EngineError;
use crate::ids::EngineHandle;

/// Result type for engine calls
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Direction of a media conduit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportDirection {
    /// Client sends media to the relay
    Publish,
    /// Relay sends media to the client
    Subscribe,
}

impl TransportDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportDirection::Publish => "publish",
            TransportDirection::Subscribe => "subscribe",
        }
    }
}

impl std::fmt::Display for TransportDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client negotiation hints sent with `createTransport`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportHints {
    /// Only offer TCP candidates
    #[serde(default)]
    pub force_tcp: bool,
}

/// Network-facing options for one transport allocation
#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub listen_ips: Vec<ListenIp>,
    pub enable_udp: bool,
    pub enable_tcp: bool,
    pub prefer_udp: bool,
    pub initial_available_outgoing_bitrate: u32,
    pub hints: TransportHints,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceParameters {
    pub username_fragment: String,
    pub password: String,
    #[serde(default)]
    pub ice_lite: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub foundation: String,
    pub priority: u32,
    pub ip: String,
    /// `udp` or `tcp`
    pub protocol: String,
    pub port: u16,
    #[serde(rename = "type")]
    pub candidate_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp_type: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DtlsRole {
    #[default]
    Auto,
    Client,
    Server,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DtlsFingerprint {
    pub algorithm: String,
    pub value: String,
}

/// DTLS parameters, used both for the relay's side and the client's completion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DtlsParameters {
    #[serde(default)]
    pub role: DtlsRole,
    pub fingerprints: Vec<DtlsFingerprint>,
}

/// Handshake parameters for a freshly allocated transport
#[derive(Debug, Clone)]
pub struct EngineTransport {
    pub handle: EngineHandle,
    pub ice_parameters: IceParameters,
    pub ice_candidates: Vec<IceCandidate>,
    pub dtls_parameters: DtlsParameters,
}

/// Result of feeding the client's handshake completion to the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeOutcome {
    Connected,
    Failed(String),
}

/// Shape of a consumer stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsumerType {
    Simple,
    Simulcast,
}

/// Engine side of a new consumption
#[derive(Debug, Clone)]
pub struct EngineConsumer {
    pub handle: EngineHandle,
    pub rtp_parameters: RtpParameters,
    pub consumer_type: ConsumerType,
    pub producer_paused: bool,
}

/// Trait for media engines
///
/// Implementations own the actual relay. All handles are opaque to the
/// coordinator and only ever passed back to the engine that issued them.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Relay-wide capability set (read-only, shared)
    fn capabilities(&self) -> &CapabilitySet;

    /// Allocate handshake parameters for a new transport
    async fn create_transport(
        &self,
        direction: TransportDirection,
        options: &TransportOptions,
    ) -> EngineResult<EngineTransport>;

    /// Cap the incoming bitrate of a transport
    async fn set_max_incoming_bitrate(&self, transport: EngineHandle, bitrate: u32) -> EngineResult<()>;

    /// Complete the DTLS handshake with the client's parameters
    async fn connect_transport(
        &self,
        transport: EngineHandle,
        dtls: &DtlsParameters,
    ) -> EngineResult<HandshakeOutcome>;

    /// Release a transport and everything the engine attached to it
    async fn close_transport(&self, transport: EngineHandle) -> EngineResult<()>;

    /// Start receiving a stream on a publish transport
    async fn produce(
        &self,
        transport: EngineHandle,
        kind: MediaKind,
        rtp_parameters: &RtpParameters,
    ) -> EngineResult<EngineHandle>;

    async fn close_producer(&self, producer: EngineHandle) -> EngineResult<()>;

    /// Whether a caller with `capabilities` can receive the producer's stream
    fn can_consume(&self, producer: EngineHandle, capabilities: &CapabilitySet) -> bool;

    /// Bind a producer's stream to a subscribe transport
    async fn consume(
        &self,
        transport: EngineHandle,
        producer: EngineHandle,
        capabilities: &CapabilitySet,
        paused: bool,
    ) -> EngineResult<EngineConsumer>;

    /// Select the simulcast layers a consumer should receive
    async fn set_preferred_layers(
        &self,
        consumer: EngineHandle,
        spatial_layer: u8,
        temporal_layer: u8,
    ) -> EngineResult<()>;

    async fn resume_consumer(&self, consumer: EngineHandle) -> EngineResult<()>;

    async fn close_consumer(&self, consumer: EngineHandle) -> EngineResult<()>;

    /// Resolves once the engine became unusable, with the reason
    async fn closed(&self) -> String;

    /// Get the name of this engine (for logging)
    fn name(&self) -> &str;
}

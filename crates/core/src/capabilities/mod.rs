//! Capability Negotiator
//!
//! Holds the relay-wide codec/extension set and answers the two questions the
//! coordinator asks about media: "what does the relay support?" and "can this
//! participant receive that stream?". The shapes mirror what browser-side
//! negotiation engines send and expect (camelCase on the wire).

pub mod negotiation;
pub mod validation;

pub use negotiation::{can_consume, consumer_parameters, CapabilityNegotiator};
pub use validation::validate_rtp_parameters;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Media kind of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }

    /// Kind encoded in a mime type prefix (`audio/opus` → audio)
    pub fn from_mime_type(mime_type: &str) -> Option<Self> {
        let (prefix, _) = mime_type.split_once('/')?;
        if prefix.eq_ignore_ascii_case("audio") {
            Some(MediaKind::Audio)
        } else if prefix.eq_ignore_ascii_case("video") {
            Some(MediaKind::Video)
        } else {
            None
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// RTCP feedback mechanism supported by a codec
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtcpFeedback {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub parameter: String,
}

impl RtcpFeedback {
    pub fn new(kind: &str, parameter: &str) -> Self {
        Self {
            kind: kind.to_string(),
            parameter: parameter.to_string(),
        }
    }
}

/// Codec a party is able to send or receive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCodecCapability {
    pub kind: MediaKind,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_payload_type: Option<u8>,
    pub clock_rate: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<u8>,
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
    #[serde(default)]
    pub rtcp_feedback: Vec<RtcpFeedback>,
}

impl RtpCodecCapability {
    /// Audio codec capability
    pub fn audio(mime_type: &str, clock_rate: u32, channels: u8) -> Self {
        Self {
            kind: MediaKind::Audio,
            mime_type: mime_type.to_string(),
            preferred_payload_type: None,
            clock_rate,
            channels: Some(channels),
            parameters: BTreeMap::new(),
            rtcp_feedback: Vec::new(),
        }
    }

    /// Video codec capability
    pub fn video(mime_type: &str, clock_rate: u32) -> Self {
        Self {
            kind: MediaKind::Video,
            mime_type: mime_type.to_string(),
            preferred_payload_type: None,
            clock_rate,
            channels: None,
            parameters: BTreeMap::new(),
            rtcp_feedback: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.to_string(), value.into());
        self
    }

    pub fn with_feedback(mut self, kind: &str, parameter: &str) -> Self {
        self.rtcp_feedback.push(RtcpFeedback::new(kind, parameter));
        self
    }

    /// Whether this is a retransmission pseudo-codec
    pub fn is_rtx(&self) -> bool {
        is_rtx_mime(&self.mime_type)
    }
}

/// RTP header extension a party understands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpHeaderExtension {
    pub kind: MediaKind,
    pub uri: String,
    pub preferred_id: u16,
    #[serde(default)]
    pub preferred_encrypt: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
}

impl RtpHeaderExtension {
    pub fn new(kind: MediaKind, uri: &str, preferred_id: u16) -> Self {
        Self {
            kind,
            uri: uri.to_string(),
            preferred_id,
            preferred_encrypt: false,
            direction: None,
        }
    }
}

/// Set of codecs and header extensions a party supports
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilitySet {
    #[serde(default)]
    pub codecs: Vec<RtpCodecCapability>,
    #[serde(default)]
    pub header_extensions: Vec<RtpHeaderExtension>,
}

impl CapabilitySet {
    /// Media (non-RTX) codecs of the given kind
    pub fn media_codecs(&self, kind: MediaKind) -> impl Iterator<Item = &RtpCodecCapability> {
        self.codecs
            .iter()
            .filter(move |c| c.kind == kind && !c.is_rtx())
    }

    pub fn is_empty(&self) -> bool {
        self.codecs.is_empty()
    }
}

/// Codec actually used by a stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCodecParameters {
    pub mime_type: String,
    pub payload_type: u8,
    pub clock_rate: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<u8>,
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
    #[serde(default)]
    pub rtcp_feedback: Vec<RtcpFeedback>,
}

impl RtpCodecParameters {
    pub fn is_rtx(&self) -> bool {
        is_rtx_mime(&self.mime_type)
    }

    /// Payload type an RTX codec repairs (`apt` parameter)
    pub fn associated_payload_type(&self) -> Option<u8> {
        self.parameters
            .get("apt")
            .and_then(Value::as_u64)
            .and_then(|v| u8::try_from(v).ok())
    }
}

/// Header extension actually used by a stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpHeaderExtensionParameters {
    pub uri: String,
    pub id: u16,
    #[serde(default)]
    pub encrypt: bool,
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
}

/// One encoding (layer) of a stream; several encodings mean simulcast
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpEncodingParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssrc: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_bitrate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scalability_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dtx: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtcpParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cname: Option<String>,
    #[serde(default = "default_reduced_size")]
    pub reduced_size: bool,
}

fn default_reduced_size() -> bool {
    true
}

/// Stream parameters submitted with a production
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mid: Option<String>,
    pub codecs: Vec<RtpCodecParameters>,
    #[serde(default)]
    pub header_extensions: Vec<RtpHeaderExtensionParameters>,
    #[serde(default)]
    pub encodings: Vec<RtpEncodingParameters>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rtcp: Option<RtcpParameters>,
}

impl RtpParameters {
    /// Codecs that carry media (RTX companions excluded)
    pub fn media_codecs(&self) -> impl Iterator<Item = &RtpCodecParameters> {
        self.codecs.iter().filter(|c| !c.is_rtx())
    }

    pub fn is_simulcast(&self) -> bool {
        self.encodings.len() > 1
    }
}

pub(crate) fn is_rtx_mime(mime_type: &str) -> bool {
    mime_type
        .rsplit_once('/')
        .map(|(_, codec)| codec.eq_ignore_ascii_case("rtx"))
        .unwrap_or(false)
}

/// Default relay codec set: Opus, VP8 and baseline H264
pub fn default_media_codecs() -> Vec<RtpCodecCapability> {
    vec![
        RtpCodecCapability::audio("audio/opus", 48000, 2),
        RtpCodecCapability::video("video/VP8", 90000).with_parameter("x-google-start-bitrate", 1000),
        RtpCodecCapability::video("video/H264", 90000)
            .with_parameter("packetization-mode", 1)
            .with_parameter("profile-level-id", "42e01f")
            .with_parameter("level-asymmetry-allowed", 1)
            .with_parameter("x-google-start-bitrate", 1000),
    ]
}

//! Capability negotiation
//!
//! Codec matching between a production's stream parameters and a caller's
//! declared receive capabilities. Every check fails closed: missing or empty
//! inputs never count as compatible.

use std::sync::Arc;

use super::{
    CapabilitySet, MediaKind, RtpCodecCapability, RtpCodecParameters, RtpHeaderExtension,
    RtpParameters,
};
use crate::{Error, Result};
use serde_json::Value;

/// First dynamic payload type handed out to codecs without a preference
const DYNAMIC_PAYLOAD_TYPE_START: u8 = 100;

/// Header extensions the relay advertises
const HEADER_EXTENSIONS: &[(MediaKind, &str)] = &[
    (MediaKind::Audio, "urn:ietf:params:rtp-hdrext:sdes:mid"),
    (MediaKind::Video, "urn:ietf:params:rtp-hdrext:sdes:mid"),
    (MediaKind::Video, "urn:ietf:params:rtp-hdrext:sdes:rtp-stream-id"),
    (MediaKind::Video, "urn:ietf:params:rtp-hdrext:sdes:repaired-rtp-stream-id"),
    (MediaKind::Audio, "http://www.webrtc.org/experiments/rtp-hdrext/abs-send-time"),
    (MediaKind::Video, "http://www.webrtc.org/experiments/rtp-hdrext/abs-send-time"),
    (
        MediaKind::Video,
        "http://www.ietf.org/id/draft-holmer-rmcat-transport-wide-cc-extensions-01",
    ),
    (MediaKind::Audio, "urn:ietf:params:rtp-hdrext:ssrc-audio-level"),
    (MediaKind::Video, "urn:3gpp:video-orientation"),
];

/// Holds the relay-wide capability set
///
/// Built once at startup and shared read-only; cloning is cheap.
#[derive(Debug, Clone)]
pub struct CapabilityNegotiator {
    router: Arc<CapabilitySet>,
}

impl CapabilityNegotiator {
    /// Build the relay capability set from configured media codecs
    ///
    /// Codecs without a preferred payload type get one from the dynamic range.
    /// Standard video RTCP feedback is attached to every video codec.
    pub fn new(media_codecs: &[RtpCodecCapability]) -> Result<Self> {
        if media_codecs.is_empty() {
            return Err(Error::InvalidConfig(
                "at least one media codec is required".to_string(),
            ));
        }

        let mut next_pt = DYNAMIC_PAYLOAD_TYPE_START;
        let mut used: Vec<u8> = media_codecs
            .iter()
            .filter_map(|c| c.preferred_payload_type)
            .collect();
        let mut codecs = Vec::with_capacity(media_codecs.len());

        for codec in media_codecs {
            if MediaKind::from_mime_type(&codec.mime_type) != Some(codec.kind) {
                return Err(Error::InvalidConfig(format!(
                    "codec {} does not match kind {}",
                    codec.mime_type, codec.kind
                )));
            }

            let mut codec = codec.clone();
            if codec.preferred_payload_type.is_none() {
                while used.contains(&next_pt) {
                    next_pt = next_pt.checked_add(1).ok_or_else(|| {
                        Error::InvalidConfig("ran out of dynamic payload types".to_string())
                    })?;
                }
                codec.preferred_payload_type = Some(next_pt);
                used.push(next_pt);
            }
            if codec.kind == MediaKind::Video && codec.rtcp_feedback.is_empty() {
                codec = codec
                    .with_feedback("nack", "")
                    .with_feedback("nack", "pli")
                    .with_feedback("ccm", "fir")
                    .with_feedback("goog-remb", "")
                    .with_feedback("transport-cc", "");
            }
            codecs.push(codec);
        }

        let header_extensions = HEADER_EXTENSIONS
            .iter()
            .enumerate()
            .map(|(i, (kind, uri))| RtpHeaderExtension::new(*kind, uri, (i + 1) as u16))
            .collect();

        Ok(Self {
            router: Arc::new(CapabilitySet {
                codecs,
                header_extensions,
            }),
        })
    }

    /// Relay-wide capability set (pure, no side effects)
    pub fn capabilities(&self) -> &CapabilitySet {
        &self.router
    }

    /// Whether the relay supports the given stream codec
    pub fn supports(&self, kind: MediaKind, codec: &RtpCodecParameters) -> bool {
        self.router
            .media_codecs(kind)
            .any(|cap| codec_matches(cap, codec))
    }

    /// Drop stream codecs the relay cannot forward
    ///
    /// RTX entries go with the media codec they repair. What remains is what
    /// consumers are later matched against.
    pub fn retain_supported(&self, kind: MediaKind, params: &mut RtpParameters) {
        let supported: Vec<u8> = params
            .media_codecs()
            .filter(|codec| self.supports(kind, codec))
            .map(|codec| codec.payload_type)
            .collect();

        params.codecs.retain(|codec| {
            if codec.is_rtx() {
                codec
                    .associated_payload_type()
                    .map(|apt| supported.contains(&apt))
                    .unwrap_or(false)
            } else {
                supported.contains(&codec.payload_type)
            }
        });
    }
}

/// Whether a capability entry describes the same codec as a stream codec
pub(crate) fn codec_matches(cap: &RtpCodecCapability, codec: &RtpCodecParameters) -> bool {
    if !cap.mime_type.eq_ignore_ascii_case(&codec.mime_type) || cap.clock_rate != codec.clock_rate
    {
        return false;
    }

    if cap.kind == MediaKind::Audio && cap.channels.unwrap_or(1) != codec.channels.unwrap_or(1) {
        return false;
    }

    // H264 is only interoperable within the same packetization mode
    if codec.mime_type.eq_ignore_ascii_case("video/H264") {
        let cap_mode = cap.parameters.get("packetization-mode").and_then(Value::as_u64);
        let codec_mode = codec
            .parameters
            .get("packetization-mode")
            .and_then(Value::as_u64);
        if cap_mode.unwrap_or(0) != codec_mode.unwrap_or(0) {
            return false;
        }
    }

    true
}

/// Compatibility check between a production and a caller's capabilities
///
/// True iff at least one media codec of the production matches a caller codec
/// of the same kind.
pub fn can_consume(production: &RtpParameters, caller: &CapabilitySet) -> bool {
    let mut media = production.media_codecs().peekable();
    if media.peek().is_none() || caller.is_empty() {
        return false;
    }

    media.any(|codec| {
        let Some(kind) = MediaKind::from_mime_type(&codec.mime_type) else {
            return false;
        };
        caller.media_codecs(kind).any(|cap| codec_matches(cap, codec))
    })
}

/// Derive the stream parameters a consumer receives
///
/// Keeps production codecs the caller supports (with their RTX companions),
/// header extensions the caller also declares, and the production encodings.
/// Returns `None` when nothing is compatible.
pub fn consumer_parameters(production: &RtpParameters, caller: &CapabilitySet) -> Option<RtpParameters> {
    let kept: Vec<&RtpCodecParameters> = production
        .media_codecs()
        .filter(|codec| {
            MediaKind::from_mime_type(&codec.mime_type)
                .map(|kind| caller.media_codecs(kind).any(|cap| codec_matches(cap, codec)))
                .unwrap_or(false)
        })
        .collect();

    if kept.is_empty() {
        return None;
    }

    let kept_pts: Vec<u8> = kept.iter().map(|c| c.payload_type).collect();
    let caller_has_rtx = caller.codecs.iter().any(|c| c.is_rtx());

    let codecs = production
        .codecs
        .iter()
        .filter(|codec| {
            if codec.is_rtx() {
                caller_has_rtx
                    && codec
                        .associated_payload_type()
                        .map(|apt| kept_pts.contains(&apt))
                        .unwrap_or(false)
            } else {
                kept_pts.contains(&codec.payload_type)
            }
        })
        .cloned()
        .collect();

    let header_extensions = production
        .header_extensions
        .iter()
        .filter(|ext| caller.header_extensions.iter().any(|c| c.uri == ext.uri))
        .cloned()
        .collect();

    Some(RtpParameters {
        mid: None,
        codecs,
        header_extensions,
        encodings: production.encodings.clone(),
        rtcp: production.rtcp.clone(),
    })
}

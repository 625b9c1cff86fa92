//! Stream parameter validation for new productions
//!
//! Checks the parameters a participant submits with `produce` against the
//! declared kind and the relay capability set. All problems are collected,
//! not just the first one found, so the error message is actionable.

use std::collections::HashSet;
use std::fmt;

use super::{CapabilitySet, MediaKind, RtpParameters};
use super::negotiation::codec_matches;
use crate::{Error, Result};

// =============================================================================
// Parameter Issues
// =============================================================================

/// One problem found in submitted stream parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParameterIssue {
    /// No codec that carries media
    NoMediaCodec,
    /// Codec mime type prefix disagrees with the declared kind
    KindMismatch { mime_type: String, kind: MediaKind },
    /// Relay does not support this codec
    UnsupportedCodec { mime_type: String, clock_rate: u32 },
    /// Same payload type used by two codecs
    DuplicatePayloadType(u8),
    /// RTX codec without a valid `apt` target
    DanglingRtx { payload_type: u8 },
}

impl fmt::Display for ParameterIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterIssue::NoMediaCodec => write!(f, "no media codec"),
            ParameterIssue::KindMismatch { mime_type, kind } => {
                write!(f, "codec {} is not {}", mime_type, kind)
            }
            ParameterIssue::UnsupportedCodec {
                mime_type,
                clock_rate,
            } => write!(f, "codec {}/{} not supported by relay", mime_type, clock_rate),
            ParameterIssue::DuplicatePayloadType(pt) => write!(f, "duplicate payload type {}", pt),
            ParameterIssue::DanglingRtx { payload_type } => {
                write!(f, "rtx payload type {} has no valid apt", payload_type)
            }
        }
    }
}

/// Collect every issue in `params` for a production of `kind`
pub fn check_rtp_parameters(
    kind: MediaKind,
    params: &RtpParameters,
    router: &CapabilitySet,
) -> Vec<ParameterIssue> {
    let mut issues = Vec::new();
    let mut seen = HashSet::new();

    for codec in &params.codecs {
        if !seen.insert(codec.payload_type) {
            issues.push(ParameterIssue::DuplicatePayloadType(codec.payload_type));
        }
    }

    let mut media_count = 0;
    let mut supported_count = 0;
    for codec in params.media_codecs() {
        media_count += 1;
        if MediaKind::from_mime_type(&codec.mime_type) != Some(kind) {
            issues.push(ParameterIssue::KindMismatch {
                mime_type: codec.mime_type.clone(),
                kind,
            });
            continue;
        }
        if router.media_codecs(kind).any(|cap| codec_matches(cap, codec)) {
            supported_count += 1;
        } else {
            issues.push(ParameterIssue::UnsupportedCodec {
                mime_type: codec.mime_type.clone(),
                clock_rate: codec.clock_rate,
            });
        }
    }

    if media_count == 0 {
        issues.push(ParameterIssue::NoMediaCodec);
    }

    // Browsers list every codec they can send; one supported one is enough
    if supported_count > 0 {
        issues.retain(|i| !matches!(i, ParameterIssue::UnsupportedCodec { .. }));
    }

    for codec in params.codecs.iter().filter(|c| c.is_rtx()) {
        let target_ok = codec
            .associated_payload_type()
            .map(|apt| {
                params
                    .media_codecs()
                    .any(|media| media.payload_type == apt)
            })
            .unwrap_or(false);
        if !target_ok {
            issues.push(ParameterIssue::DanglingRtx {
                payload_type: codec.payload_type,
            });
        }
    }

    issues
}

/// Validate stream parameters submitted with `produce`
///
/// Fails with `Error::Precondition` listing every issue found.
pub fn validate_rtp_parameters(
    kind: MediaKind,
    params: &RtpParameters,
    router: &CapabilitySet,
) -> Result<()> {
    let issues = check_rtp_parameters(kind, params, router);
    if issues.is_empty() {
        return Ok(());
    }

    let detail = issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ");
    Err(Error::Precondition(format!(
        "invalid {} rtpParameters: {}",
        kind, detail
    )))
}

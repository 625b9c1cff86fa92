//! JSON-RPC 2.0 signaling protocol types
//!
//! Every inbound request is parsed into a [`SignalingRequest`] before it
//! reaches the session. Payloads that do not match the schema of their method
//! never get further than this module.

use roomcast_core::capabilities::{CapabilitySet, MediaKind, RtpParameters};
use roomcast_core::engine::{DtlsParameters, TransportDirection, TransportHints};
use roomcast_core::{ConsumptionId, ErrorKind, Notification, ParticipantId, ProductionId, TransportId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// JSON-RPC 2.0 protocol version
pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC 2.0 request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcRequest {
    /// Protocol version (must be "2.0")
    pub jsonrpc: String,

    /// Method name to invoke
    pub method: String,

    /// Method parameters
    #[serde(default)]
    pub params: Value,

    /// Request ID for matching with response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

/// JSON-RPC 2.0 response (success)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub result: Value,
    pub id: Value,
}

/// JSON-RPC 2.0 error response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcError {
    pub jsonrpc: String,
    pub error: ErrorObject,
    pub id: Value,
}

/// JSON-RPC 2.0 error object
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorObject {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Server push (JSON-RPC notification, no id)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    pub params: Value,
}

/// Error codes
pub mod error_codes {
    /// Internal JSON-RPC error
    pub const INTERNAL_ERROR: i32 = -32603;

    /// Connection already has a participant
    pub const REGISTRATION_ERROR: i32 = -32010;

    /// Resource not in the required state or ownership
    pub const PRECONDITION_ERROR: i32 = -32011;

    /// Media engine could not allocate or negotiate
    pub const ENGINE_ALLOCATION_ERROR: i32 = -32012;

    /// Capability mismatch or missing target at consume time
    pub const INCOMPATIBLE_OR_PRECONDITION_ERROR: i32 = -32013;

    /// Identity no longer resolves
    pub const NOT_FOUND_ERROR: i32 = -32014;

    /// Duplicate, out-of-order or malformed call
    pub const INVALID_STATE_ERROR: i32 = -32015;
}

/// Wire code for an error category
pub fn code_for(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::RegistrationError => error_codes::REGISTRATION_ERROR,
        ErrorKind::PreconditionError => error_codes::PRECONDITION_ERROR,
        ErrorKind::EngineAllocationError => error_codes::ENGINE_ALLOCATION_ERROR,
        ErrorKind::IncompatibleOrPreconditionError => {
            error_codes::INCOMPATIBLE_OR_PRECONDITION_ERROR
        }
        ErrorKind::NotFoundError => error_codes::NOT_FOUND_ERROR,
        ErrorKind::InvalidStateError => error_codes::INVALID_STATE_ERROR,
        ErrorKind::ConfigError => error_codes::INTERNAL_ERROR,
    }
}

impl JsonRpcResponse {
    pub fn new(result: Value, id: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result,
            id,
        }
    }

    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl JsonRpcError {
    pub fn new(code: i32, message: String, id: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            error: ErrorObject {
                code,
                message,
                data: None,
            },
            id,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.error.data = Some(data);
        self
    }

    /// Structured error for a categorized failure
    pub fn from_kind(kind: ErrorKind, message: String, id: Value) -> Self {
        Self::new(code_for(kind), message, id).with_data(json!({ "kind": kind.as_str() }))
    }

    /// Structured error for a session coordinator failure
    pub fn from_core(err: &roomcast_core::Error, id: Value) -> Self {
        Self::from_kind(err.kind(), err.to_string(), id)
    }

    /// Malformed or unknown request
    pub fn invalid_state(message: String, id: Value) -> Self {
        Self::from_kind(ErrorKind::InvalidStateError, message, id)
    }

    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl JsonRpcNotification {
    pub fn new(method: &str, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.to_string(),
            params,
        }
    }

    /// First message on every connection
    pub fn welcome(participant_id: ParticipantId) -> Self {
        Self::new("welcome", json!({ "participantId": participant_id }))
    }

    /// Wire form of a coordinator notification
    pub fn from_core(notification: &Notification) -> crate::Result<Self> {
        let mut value = serde_json::to_value(notification)?;
        let params = value
            .get_mut("params")
            .map(Value::take)
            .unwrap_or(Value::Null);
        Ok(Self::new(notification.method(), params))
    }

    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// =============================================================================
// Request schemas
// =============================================================================

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreateTransportParams {
    pub direction: TransportDirection,
    #[serde(default)]
    pub hints: TransportHints,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectTransportParams {
    pub transport_id: TransportId,
    pub dtls_parameters: DtlsParameters,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProduceParams {
    pub transport_id: TransportId,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeParams {
    pub rtp_capabilities: CapabilitySet,
    pub production_id: ProductionId,
    #[serde(default)]
    pub transport_id: Option<TransportId>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResumeParams {
    pub consumption_id: ConsumptionId,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EndProductionParams {
    pub production_id: ProductionId,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CloseTransportParams {
    pub transport_id: TransportId,
}

/// Typed signaling request, one variant per method
#[derive(Debug, Clone, PartialEq)]
pub enum SignalingRequest {
    GetCapabilities,
    CreateTransport(CreateTransportParams),
    ConnectTransport(ConnectTransportParams),
    Produce(ProduceParams),
    Consume(ConsumeParams),
    Resume(ResumeParams),
    EndProduction(EndProductionParams),
    CloseTransport(CloseTransportParams),
    Leave,
}

/// Why a request could not be turned into a [`SignalingRequest`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolViolation {
    #[error("unsupported jsonrpc version {0:?}")]
    Version(String),

    #[error("unknown method {0}")]
    UnknownMethod(String),

    #[error("invalid params for {method}: {reason}")]
    InvalidParams { method: String, reason: String },
}

fn params<T: DeserializeOwned>(method: &str, params: Value) -> Result<T, ProtocolViolation> {
    serde_json::from_value(params).map_err(|e| ProtocolViolation::InvalidParams {
        method: method.to_string(),
        reason: e.to_string(),
    })
}

impl SignalingRequest {
    /// Validate a raw request against the schema of its method
    pub fn from_rpc(request: JsonRpcRequest) -> Result<Self, ProtocolViolation> {
        if request.jsonrpc != JSONRPC_VERSION {
            return Err(ProtocolViolation::Version(request.jsonrpc));
        }

        let method = request.method.as_str();
        let p = request.params;
        match method {
            "getCapabilities" => Ok(Self::GetCapabilities),
            "createTransport" => params(method, p).map(Self::CreateTransport),
            "connectTransport" => params(method, p).map(Self::ConnectTransport),
            "produce" => params(method, p).map(Self::Produce),
            "consume" => params(method, p).map(Self::Consume),
            "resume" => params(method, p).map(Self::Resume),
            "endProduction" => params(method, p).map(Self::EndProduction),
            "closeTransport" => params(method, p).map(Self::CloseTransport),
            "leave" => Ok(Self::Leave),
            other => Err(ProtocolViolation::UnknownMethod(other.to_string())),
        }
    }

    /// Method name (for logging)
    pub fn method(&self) -> &'static str {
        match self {
            Self::GetCapabilities => "getCapabilities",
            Self::CreateTransport(_) => "createTransport",
            Self::ConnectTransport(_) => "connectTransport",
            Self::Produce(_) => "produce",
            Self::Consume(_) => "consume",
            Self::Resume(_) => "resume",
            Self::EndProduction(_) => "endProduction",
            Self::CloseTransport(_) => "closeTransport",
            Self::Leave => "leave",
        }
    }
}

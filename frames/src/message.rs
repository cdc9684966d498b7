//! The closed set of wire messages and the JSON text codec.
//!
//! DESIGN
//! ======
//! One variant per logical operation, tagged by `type`. Field names are
//! camelCase on the wire, optional fields are omitted when absent, and the
//! default scope is never written. An unrecognized `type` is a decode error,
//! never a silently skipped message.

use serde::{Deserialize, Serialize};

use crate::CodecError;
use crate::types::{Buffer, ErrorInfo, MessageScope, Topic};

/// A single message on the broker wire protocol.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum Message {
    /// First message on every connection.
    Connect {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        access_token: Option<String>,
    },
    /// Handshake result: the assigned client id or an error.
    ConnectResponse {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ErrorInfo>,
    },
    Subscribe {
        topic: Topic,
    },
    Unsubscribe {
        topic: Topic,
    },
    Publish {
        topic: Topic,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Buffer>,
        #[serde(default, skip_serializing_if = "MessageScope::is_default")]
        scope: MessageScope,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        correlation_id: Option<String>,
    },
    /// Delivery of a published message to one subscriber.
    #[serde(rename = "Topic")]
    Update {
        topic: Topic,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Buffer>,
        #[serde(default, skip_serializing_if = "MessageScope::is_default")]
        scope: MessageScope,
        source_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        correlation_id: Option<String>,
    },
    RegisterService {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        endpoint: String,
    },
    RegisterServiceResponse {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ErrorInfo>,
    },
    UnregisterService {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        endpoint: String,
    },
    UnregisterServiceResponse {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ErrorInfo>,
    },
    Invoke {
        request_id: String,
        endpoint: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Buffer>,
        #[serde(default, skip_serializing_if = "MessageScope::is_default")]
        scope: MessageScope,
        /// Caller's client id, stamped by the broker on the forwarded copy.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        correlation_id: Option<String>,
    },
    InvokeResponse {
        request_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Buffer>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ErrorInfo>,
    },
}

impl Message {
    /// Wire name of the variant, for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "Connect",
            Self::ConnectResponse { .. } => "ConnectResponse",
            Self::Subscribe { .. } => "Subscribe",
            Self::Unsubscribe { .. } => "Unsubscribe",
            Self::Publish { .. } => "Publish",
            Self::Update { .. } => "Topic",
            Self::RegisterService { .. } => "RegisterService",
            Self::RegisterServiceResponse { .. } => "RegisterServiceResponse",
            Self::UnregisterService { .. } => "UnregisterService",
            Self::UnregisterServiceResponse { .. } => "UnregisterServiceResponse",
            Self::Invoke { .. } => "Invoke",
            Self::InvokeResponse { .. } => "InvokeResponse",
        }
    }

    /// Correlation key of request/response variants.
    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Self::Invoke { request_id, .. } | Self::InvokeResponse { request_id, .. } => Some(request_id),
            Self::RegisterService { request_id, .. }
            | Self::RegisterServiceResponse { request_id, .. }
            | Self::UnregisterService { request_id, .. }
            | Self::UnregisterServiceResponse { request_id, .. } => request_id.as_deref(),
            _ => None,
        }
    }

    /// Successful invoke response.
    pub fn invoke_ok(request_id: impl Into<String>, payload: Option<Buffer>) -> Self {
        Self::InvokeResponse { request_id: request_id.into(), payload, error: None }
    }

    /// Failed invoke response.
    pub fn invoke_err(request_id: impl Into<String>, error: ErrorInfo) -> Self {
        Self::InvokeResponse { request_id: request_id.into(), payload: None, error: Some(error) }
    }
}

/// Encode a message as JSON text.
///
/// # Errors
///
/// Returns [`CodecError::Json`] if serialization fails, which does not
/// happen for well-formed messages.
pub fn encode_json(message: &Message) -> Result<String, CodecError> {
    Ok(serde_json::to_string(message)?)
}

/// Decode JSON text into a message.
///
/// # Errors
///
/// Returns [`CodecError::Json`] for malformed JSON, an unknown `type`, a
/// missing required field, bad base64, or a malformed scope.
pub fn decode_json(text: &str) -> Result<Message, CodecError> {
    Ok(serde_json::from_str(text)?)
}

#[cfg(test)]
#[path = "message_test.rs"]
mod tests;

//! Shared message model and codecs for the broker wire protocol.
//!
//! This crate owns the wire representation used by both `server` and
//! `client`. Every logical operation is one [`Message`] variant; the broker
//! routes on envelope fields only and never looks inside a [`Buffer`].
//!
//! Two encodings carry the same model:
//! - JSON text ([`encode_json`] / [`decode_json`]), `type`-tagged camelCase.
//! - Protobuf binary ([`encode_wire`] / [`decode_wire`]), a flat record.

mod message;
mod types;
mod wire;

pub use message::{Message, decode_json, encode_json};
pub use types::{Buffer, ErrorInfo, IdentifierError, MessageScope, Topic, validate_endpoint};
pub use wire::{decode_wire, encode_wire};

/// Error returned by the decoding functions.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The text could not be parsed as a JSON message.
    #[error("failed to decode json message: {0}")]
    Json(#[from] serde_json::Error),
    /// The raw bytes could not be decoded as a protobuf `WireMessage`.
    #[error("failed to decode protobuf message: {0}")]
    Decode(#[from] prost::DecodeError),
    /// The `type` discriminator names no known message.
    #[error("unknown message type: {0:?}")]
    UnknownType(String),
    /// A variant was missing one of its required fields.
    #[error("{kind} message is missing required field `{field}`")]
    MissingField { kind: &'static str, field: &'static str },
    /// The payload field was not valid base64 / the scope was malformed.
    #[error("invalid field value: {0}")]
    InvalidField(String),
}

// =============================================================================
// ERROR CODES
// =============================================================================

/// Grepable error code and retryable flag for structured error payloads.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}

/// Wire values of [`ErrorInfo::kind`].
pub mod codes {
    pub const INVALID_TOPIC: &str = "E_INVALID_TOPIC";
    pub const INVALID_ENDPOINT: &str = "E_INVALID_ENDPOINT";
    pub const DUPLICATE_REQUEST_ID: &str = "E_DUPLICATE_REQUEST_ID";
    pub const DUPLICATE_SERVICE_NAME: &str = "E_DUPLICATE_SERVICE_NAME";
    pub const UNKNOWN_SERVICE: &str = "E_UNKNOWN_SERVICE";
    pub const UNKNOWN_CLIENT: &str = "E_UNKNOWN_CLIENT";
    pub const SERVICE_UNAVAILABLE: &str = "E_SERVICE_UNAVAILABLE";
    pub const CONNECTION_CLOSED: &str = "E_CONNECTION_CLOSED";
    pub const CONNECTION_ABORTED: &str = "E_CONNECTION_ABORTED";
    pub const UNAUTHORIZED: &str = "E_UNAUTHORIZED";
    pub const PROTOCOL: &str = "E_PROTOCOL";
    pub const HANDLER_FAILED: &str = "E_HANDLER_FAILED";
}

impl ErrorCode for IdentifierError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Topic(_) => codes::INVALID_TOPIC,
            Self::Endpoint(_) => codes::INVALID_ENDPOINT,
            Self::Scope(_) => codes::PROTOCOL,
        }
    }
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;

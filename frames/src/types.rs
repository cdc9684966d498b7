//! Value types carried inside messages.

use std::fmt;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::ErrorCode;

/// Rejected topic, endpoint, or scope string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentifierError {
    #[error("invalid topic: {0:?}")]
    Topic(String),
    #[error("invalid endpoint: {0:?}")]
    Endpoint(String),
    #[error("invalid scope: {0:?}")]
    Scope(String),
}

/// Identifiers must carry at least one visible character and no control characters.
fn is_valid_identifier(raw: &str) -> bool {
    !raw.trim().is_empty() && !raw.chars().any(char::is_control)
}

// =============================================================================
// TOPIC
// =============================================================================

/// Opaque pub/sub channel name. No hierarchy is implied.
///
/// Deserialization does not validate; the broker checks [`Topic::is_valid`]
/// before touching its tables so a bad name never reaches them.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(String);

impl Topic {
    /// Build a validated topic.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError::Topic`] for empty, blank, or control-character names.
    pub fn parse(raw: impl Into<String>) -> Result<Self, IdentifierError> {
        let raw = raw.into();
        if is_valid_identifier(&raw) { Ok(Self(raw)) } else { Err(IdentifierError::Topic(raw)) }
    }

    pub(crate) fn unchecked(raw: String) -> Self {
        Self(raw)
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        is_valid_identifier(&self.0)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Topic {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Check a service endpoint name. Same rules as topic names.
///
/// # Errors
///
/// Returns [`IdentifierError::Endpoint`] when the name is unusable.
pub fn validate_endpoint(endpoint: &str) -> Result<(), IdentifierError> {
    if is_valid_identifier(endpoint) { Ok(()) } else { Err(IdentifierError::Endpoint(endpoint.to_owned())) }
}

// =============================================================================
// SCOPE
// =============================================================================

/// Delivery target of a published message or an invocation.
///
/// Encoded as an absent field for [`MessageScope::Default`] and as
/// `"@<clientId>"` for a targeted client.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum MessageScope {
    /// Every current subscriber.
    #[default]
    Default,
    /// Only the connection with this client id.
    ClientId(String),
}

impl MessageScope {
    #[must_use]
    pub fn client(client_id: impl Into<String>) -> Self {
        Self::ClientId(client_id.into())
    }

    /// Parse the encoded form. The empty string is the default scope.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError::Scope`] for anything that is neither empty
    /// nor `@` followed by a client id.
    pub fn parse(raw: &str) -> Result<Self, IdentifierError> {
        if raw.is_empty() {
            return Ok(Self::Default);
        }
        match raw.strip_prefix('@') {
            Some(id) if !id.is_empty() => Ok(Self::ClientId(id.to_owned())),
            _ => Err(IdentifierError::Scope(raw.to_owned())),
        }
    }

    #[must_use]
    pub fn is_default(&self) -> bool {
        matches!(self, Self::Default)
    }

    #[must_use]
    pub fn client_id(&self) -> Option<&str> {
        match self {
            Self::Default => None,
            Self::ClientId(id) => Some(id),
        }
    }

    /// Encoded form, `None` for the default scope.
    #[must_use]
    pub fn encode(&self) -> Option<String> {
        self.client_id().map(|id| format!("@{id}"))
    }
}

impl Serialize for MessageScope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.encode() {
            Some(raw) => serializer.serialize_str(&raw),
            None => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for MessageScope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Self::parse(raw.as_deref().unwrap_or_default()).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// BUFFER
// =============================================================================

/// Immutable opaque payload. Cloning shares the bytes.
///
/// JSON carries it as a standard base64 string; protobuf as raw bytes.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Buffer(Arc<[u8]>);

impl Buffer {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// View the payload as UTF-8 text.
    ///
    /// # Errors
    ///
    /// Returns the UTF-8 error when the bytes are not valid text.
    pub fn as_str(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.0)
    }

    pub(crate) fn to_base64(&self) -> String {
        STANDARD.encode(&self.0)
    }

    pub(crate) fn from_base64(raw: &str) -> Result<Self, base64::DecodeError> {
        STANDARD.decode(raw).map(Self::from)
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_str() {
            Ok(text) => write!(f, "Buffer({text:?})"),
            Err(_) => write!(f, "Buffer({} bytes)", self.len()),
        }
    }
}

impl From<Vec<u8>> for Buffer {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes.into())
    }
}

impl From<&[u8]> for Buffer {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.into())
    }
}

impl From<String> for Buffer {
    fn from(text: String) -> Self {
        Self::from(text.into_bytes())
    }
}

impl From<&str> for Buffer {
    fn from(text: &str) -> Self {
        Self::from(text.as_bytes())
    }
}

impl Serialize for Buffer {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for Buffer {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::from_base64(&raw).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// ERROR INFO
// =============================================================================

/// Error payload of a response message: `{ "type": code, "message"?: text }`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ErrorInfo {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self { kind: kind.into(), message: Some(message.into()) }
    }

    /// Build from any typed error that knows its code.
    pub fn from_error(err: &impl ErrorCode) -> Self {
        Self::new(err.error_code(), err.to_string())
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{}: {message}", self.kind),
            None => f.write_str(&self.kind),
        }
    }
}

#[cfg(test)]
#[path = "types_test.rs"]
mod tests;

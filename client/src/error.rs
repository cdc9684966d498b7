//! Typed client errors.
//!
//! Broker replies carry an [`ErrorInfo`] with an `E_*` code; [`ClientError`]
//! maps each known code to a variant so callers can match on failure kind
//! instead of comparing strings. Codes the client does not know survive as
//! [`ClientError::Remote`].

use std::time::Duration;

use frames::{ErrorCode, ErrorInfo, IdentifierError, codes};

/// Failure of a client operation.
///
/// Variants that mirror a broker error code carry the broker's message text
/// as-is, so `Display` shows exactly what the broker said.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error("{0}")]
    InvalidTopic(String),
    #[error("{0}")]
    InvalidEndpoint(String),
    #[error("{0}")]
    DuplicateRequestId(String),
    #[error("{0}")]
    DuplicateServiceName(String),
    #[error("{0}")]
    UnknownService(String),
    #[error("{0}")]
    UnknownClient(String),
    #[error("{0}")]
    ServiceUnavailable(String),
    /// The transport could not be established or the handshake failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    /// The client was closed locally.
    #[error("connection closed")]
    ConnectionClosed,
    /// The transport dropped without a local close.
    #[error("connection aborted")]
    ConnectionAborted,
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Protocol(String),
    /// An error code this client has no variant for, e.g. one chosen by a
    /// service handler.
    #[error("{code}: {message}")]
    Remote { code: String, message: String },
}

impl From<ErrorInfo> for ClientError {
    fn from(info: ErrorInfo) -> Self {
        let message = info.message.unwrap_or_else(|| info.kind.clone());
        match info.kind.as_str() {
            codes::INVALID_TOPIC => Self::InvalidTopic(message),
            codes::INVALID_ENDPOINT => Self::InvalidEndpoint(message),
            codes::DUPLICATE_REQUEST_ID => Self::DuplicateRequestId(message),
            codes::DUPLICATE_SERVICE_NAME => Self::DuplicateServiceName(message),
            codes::UNKNOWN_SERVICE => Self::UnknownService(message),
            codes::UNKNOWN_CLIENT => Self::UnknownClient(message),
            codes::SERVICE_UNAVAILABLE => Self::ServiceUnavailable(message),
            codes::CONNECTION_CLOSED => Self::ConnectionClosed,
            codes::CONNECTION_ABORTED => Self::ConnectionAborted,
            codes::UNAUTHORIZED => Self::Unauthorized(message),
            codes::PROTOCOL => Self::Protocol(message),
            _ => Self::Remote { code: info.kind, message },
        }
    }
}

impl From<IdentifierError> for ClientError {
    fn from(err: IdentifierError) -> Self {
        let message = err.to_string();
        match err {
            IdentifierError::Topic(_) => Self::InvalidTopic(message),
            IdentifierError::Endpoint(_) => Self::InvalidEndpoint(message),
            IdentifierError::Scope(_) => Self::Protocol(message),
        }
    }
}

impl ErrorCode for ClientError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidTopic(_) => codes::INVALID_TOPIC,
            Self::InvalidEndpoint(_) => codes::INVALID_ENDPOINT,
            Self::DuplicateRequestId(_) => codes::DUPLICATE_REQUEST_ID,
            Self::DuplicateServiceName(_) => codes::DUPLICATE_SERVICE_NAME,
            Self::UnknownService(_) => codes::UNKNOWN_SERVICE,
            Self::UnknownClient(_) => codes::UNKNOWN_CLIENT,
            Self::ServiceUnavailable(_) => codes::SERVICE_UNAVAILABLE,
            Self::ConnectionFailed(_) | Self::ConnectionAborted | Self::Timeout(_) => codes::CONNECTION_ABORTED,
            Self::ConnectionClosed => codes::CONNECTION_CLOSED,
            Self::Unauthorized(_) => codes::UNAUTHORIZED,
            Self::Protocol(_) => codes::PROTOCOL,
            Self::Remote { .. } => codes::HANDLER_FAILED,
        }
    }

    fn retryable(&self) -> bool {
        matches!(
            self,
            Self::ServiceUnavailable(_) | Self::ConnectionFailed(_) | Self::ConnectionAborted | Self::Timeout(_)
        )
    }
}

#[cfg(test)]
#[path = "error_test.rs"]
mod tests;

//! Request/response correlation across connections.
//!
//! DESIGN
//! ======
//! The broker never forwards a caller's request id. Each forwarded `Invoke`
//! gets a fresh id, and the correlation entry maps `(owner, fresh id)` back
//! to `(caller, original id)`. The entry is written before the forward is
//! queued, so a fast answer can never arrive ahead of its entry.
//!
//! Responses for ids the table does not know (timed out on the caller,
//! answered twice, owner guessing) are dropped without a reply.

use frames::{Buffer, ErrorInfo, IdentifierError, Message, MessageScope, validate_endpoint};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::state::{BrokerState, Invocation};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum InvokeError {
    #[error(transparent)]
    InvalidEndpoint(#[from] IdentifierError),
    #[error("unknown service: {0}")]
    UnknownService(String),
    #[error("unknown client: {0}")]
    UnknownClient(String),
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("duplicate request id: {0}")]
    DuplicateRequestId(String),
}

impl frames::ErrorCode for InvokeError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidEndpoint(e) => e.error_code(),
            Self::UnknownService(_) => frames::codes::UNKNOWN_SERVICE,
            Self::UnknownClient(_) => frames::codes::UNKNOWN_CLIENT,
            Self::ServiceUnavailable(_) => frames::codes::SERVICE_UNAVAILABLE,
            Self::DuplicateRequestId(_) => frames::codes::DUPLICATE_REQUEST_ID,
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::ServiceUnavailable(_))
    }
}

/// An `Invoke` as received from the caller.
pub struct InvokeRequest {
    pub request_id: String,
    pub endpoint: String,
    pub payload: Option<Buffer>,
    pub scope: MessageScope,
    pub correlation_id: Option<String>,
}

/// Forward an invocation to the endpoint owner, or to the targeted client.
///
/// # Errors
///
/// Fails without forwarding anything when the endpoint is malformed or
/// unowned, the targeted client is unknown, the owner is gone, or the caller
/// reuses a pending request id.
pub async fn invoke(state: &BrokerState, caller_id: &str, request: InvokeRequest) -> Result<(), InvokeError> {
    let InvokeRequest { request_id, endpoint, payload, scope, correlation_id } = request;
    validate_endpoint(&endpoint)?;

    let owner_id = match scope.client_id() {
        Some(target) => {
            if !state.clients.read().await.contains_key(target) {
                return Err(InvokeError::UnknownClient(target.to_owned()));
            }
            target.to_owned()
        }
        None => state
            .services
            .read()
            .await
            .get(&endpoint)
            .cloned()
            .ok_or_else(|| InvokeError::UnknownService(endpoint.clone()))?,
    };

    let service_request_id = Uuid::new_v4().to_string();
    let invocation = Invocation {
        caller_id: caller_id.to_owned(),
        caller_request_id: request_id,
        owner_id: owner_id.clone(),
        service_request_id: service_request_id.clone(),
        endpoint: endpoint.clone(),
    };
    if let Err(dup) = state.invocations.lock().await.insert(invocation) {
        return Err(InvokeError::DuplicateRequestId(dup.caller_request_id));
    }

    let forwarded = Message::Invoke {
        request_id: service_request_id.clone(),
        endpoint: endpoint.clone(),
        payload,
        scope,
        source_id: Some(caller_id.to_owned()),
        correlation_id,
    };
    if !state.send_to(&owner_id, forwarded).await {
        state.invocations.lock().await.complete(&owner_id, &service_request_id);
        return Err(InvokeError::ServiceUnavailable(endpoint));
    }

    debug!(%caller_id, %owner_id, %endpoint, %service_request_id, "broker: invoke forwarded");
    Ok(())
}

/// Route an owner's `InvokeResponse` back to the caller. Returns whether a
/// pending entry matched and the caller was still connected.
pub async fn respond(
    state: &BrokerState,
    owner_id: &str,
    request_id: &str,
    payload: Option<Buffer>,
    error: Option<ErrorInfo>,
) -> bool {
    let Some(invocation) = state.invocations.lock().await.complete(owner_id, request_id) else {
        debug!(%owner_id, %request_id, "broker: dropping response for unknown request");
        return false;
    };
    let response = Message::InvokeResponse { request_id: invocation.caller_request_id, payload, error };
    let delivered = state.send_to(&invocation.caller_id, response).await;
    if !delivered {
        debug!(caller_id = %invocation.caller_id, "broker: caller left before response");
    }
    delivered
}

/// Tell a caller its invocation died with the owner's connection.
pub(crate) async fn fail_orphan(state: &BrokerState, invocation: Invocation) {
    let error = ErrorInfo::new(
        frames::codes::SERVICE_UNAVAILABLE,
        format!("service unavailable: {}", invocation.endpoint),
    );
    let response = Message::invoke_err(invocation.caller_request_id, error);
    if !state.send_to(&invocation.caller_id, response).await {
        warn!(caller_id = %invocation.caller_id, "broker: could not notify caller of lost service");
    }
}

#[cfg(test)]
#[path = "invoke_test.rs"]
mod tests;

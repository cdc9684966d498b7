//! Handlers for registered services and local endpoints.
//!
//! A handler receives the forwarded `Invoke` as a [`ServiceRequest`] and
//! returns the response payload. Errors, and panics, become an
//! `InvokeResponse` error for the caller; they never reach the client's IO
//! task.

use std::future::Future;
use std::sync::Arc;

use frames::{Buffer, ErrorInfo, MessageScope, codes};

/// One invocation delivered to a handler.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceRequest {
    pub endpoint: String,
    pub payload: Option<Buffer>,
    /// Client id of the caller, as stamped by the broker.
    pub source_id: Option<String>,
    pub scope: MessageScope,
    pub correlation_id: Option<String>,
}

/// Failure reported by a handler. `code` travels to the caller verbatim.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct HandlerError {
    pub code: String,
    pub message: String,
}

impl HandlerError {
    /// Generic handler failure (`E_HANDLER_FAILED`).
    pub fn new(message: impl Into<String>) -> Self {
        Self::with_code(codes::HANDLER_FAILED, message)
    }

    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self { code: code.into(), message: message.into() }
    }
}

impl From<HandlerError> for ErrorInfo {
    fn from(err: HandlerError) -> Self {
        ErrorInfo::new(err.code, err.message)
    }
}

#[async_trait::async_trait]
pub trait ServiceHandler: Send + Sync + 'static {
    async fn handle(&self, request: ServiceRequest) -> Result<Option<Buffer>, HandlerError>;
}

/// Adapt an async closure into a [`ServiceHandler`].
pub fn service_fn<F, Fut>(f: F) -> ServiceFn<F>
where
    F: Fn(ServiceRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<Buffer>, HandlerError>> + Send + 'static,
{
    ServiceFn(f)
}

pub struct ServiceFn<F>(F);

#[async_trait::async_trait]
impl<F, Fut> ServiceHandler for ServiceFn<F>
where
    F: Fn(ServiceRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<Buffer>, HandlerError>> + Send + 'static,
{
    async fn handle(&self, request: ServiceRequest) -> Result<Option<Buffer>, HandlerError> {
        (self.0)(request).await
    }
}

/// Run `handler` on its own task so a panic is reported instead of lost.
pub(crate) async fn run(
    handler: Arc<dyn ServiceHandler>,
    request: ServiceRequest,
) -> Result<Option<Buffer>, ErrorInfo> {
    match tokio::spawn(async move { handler.handle(request).await }).await {
        Ok(Ok(payload)) => Ok(payload),
        Ok(Err(err)) => Err(err.into()),
        Err(join) => Err(ErrorInfo::new(codes::HANDLER_FAILED, format!("handler panicked: {join}"))),
    }
}

#[cfg(test)]
#[path = "service_test.rs"]
mod tests;

//! Service endpoint registry.
//!
//! DESIGN
//! ======
//! At most one live owner per endpoint name. The check and the insert run
//! under one `services` write lock so two concurrent registrations cannot
//! both win. An entry whose owner already left `clients` but whose cleanup
//! has not run yet counts as free.

use frames::{IdentifierError, validate_endpoint};
use tracing::info;

use crate::services::session::Session;
use crate::state::BrokerState;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error(transparent)]
    InvalidEndpoint(#[from] IdentifierError),
    #[error("service already registered: {0}")]
    DuplicateServiceName(String),
}

impl frames::ErrorCode for RegistryError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidEndpoint(e) => e.error_code(),
            Self::DuplicateServiceName(_) => frames::codes::DUPLICATE_SERVICE_NAME,
        }
    }
}

/// Claim `endpoint` for the session.
///
/// # Errors
///
/// Returns [`RegistryError::InvalidEndpoint`] for a malformed name and
/// [`RegistryError::DuplicateServiceName`] when a live client owns it,
/// including this one.
pub async fn register(state: &BrokerState, session: &mut Session, endpoint: &str) -> Result<(), RegistryError> {
    validate_endpoint(endpoint)?;

    let mut services = state.services.write().await;
    if let Some(owner) = services.get(endpoint) {
        if state.clients.read().await.contains_key(owner) {
            return Err(RegistryError::DuplicateServiceName(endpoint.to_owned()));
        }
    }
    services.insert(endpoint.to_owned(), session.client_id.clone());
    drop(services);

    session.services.insert(endpoint.to_owned());
    info!(client_id = %session.client_id, %endpoint, "broker: service registered");
    Ok(())
}

/// Release `endpoint` if the session owns it. Anything else is a no-op.
pub async fn unregister(state: &BrokerState, session: &mut Session, endpoint: &str) {
    if !session.services.remove(endpoint) {
        return;
    }
    let mut services = state.services.write().await;
    if services.get(endpoint) == Some(&session.client_id) {
        services.remove(endpoint);
        info!(client_id = %session.client_id, %endpoint, "broker: service unregistered");
    }
}

/// Current owner of an endpoint.
pub async fn owner_of(state: &BrokerState, endpoint: &str) -> Option<String> {
    state.services.read().await.get(endpoint).cloned()
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod tests;

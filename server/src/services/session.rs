//! Per-connection session owned by its worker.
//!
//! DESIGN
//! ======
//! The session mirrors what the shared tables hold for one client, so the
//! disconnect pass can undo exactly that client's entries without scanning
//! every topic and endpoint. Nothing else reads it.

use std::collections::HashSet;

use frames::Topic;
use tracing::info;

use crate::services::invoke;
use crate::state::BrokerState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Connected,
    Disconnected,
}

#[derive(Debug)]
pub struct Session {
    pub client_id: String,
    pub state: SessionState,
    pub topics: HashSet<Topic>,
    pub services: HashSet<String>,
}

impl Session {
    #[must_use]
    pub fn new(client_id: String) -> Self {
        Self { client_id, state: SessionState::Connecting, topics: HashSet::new(), services: HashSet::new() }
    }
}

/// Remove every trace of the session from the shared tables.
///
/// Callers still waiting on an endpoint this client owned receive
/// `E_SERVICE_UNAVAILABLE`; invocations this client made are discarded.
pub async fn disconnect(state: &BrokerState, session: &mut Session) {
    if session.state == SessionState::Disconnected {
        return;
    }
    let client_id = session.client_id.clone();

    state.clients.write().await.remove(&client_id);

    {
        let mut topics = state.topics.write().await;
        for topic in session.topics.drain() {
            if let Some(subscribers) = topics.get_mut(&topic) {
                subscribers.remove(&client_id);
                if subscribers.is_empty() {
                    topics.remove(&topic);
                }
            }
        }
    }

    {
        let mut services = state.services.write().await;
        for endpoint in session.services.drain() {
            if services.get(&endpoint) == Some(&client_id) {
                services.remove(&endpoint);
            }
        }
    }

    let orphaned = state.invocations.lock().await.remove_client(&client_id);
    let failed = orphaned.len();
    for invocation in orphaned {
        invoke::fail_orphan(state, invocation).await;
    }

    session.state = SessionState::Disconnected;
    info!(%client_id, failed_invocations = failed, "broker: session cleaned up");
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;

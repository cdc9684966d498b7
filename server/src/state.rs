//! Shared broker state.
//!
//! DESIGN
//! ======
//! `BrokerState` is cloned into every connection worker and into the Axum
//! router. Each table has its own lock so routing on one table never waits
//! on a socket or on an unrelated table:
//! - `clients`: live client id -> outbound queue
//! - `topics`: topic -> subscribed client ids (empty sets are pruned)
//! - `services`: endpoint -> owning client id
//! - `invocations`: in-flight forwarded `Invoke`s
//!
//! LOCK ORDER
//! ==========
//! Code that holds two locks at once takes `services` before `clients`.
//! Everything else releases one table before touching the next.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use frames::{Message, Topic};
use tokio::sync::{Mutex, RwLock, mpsc};

use crate::auth::AccessTokenValidator;
use crate::config::BrokerConfig;

/// Outbound queue of one connection. Unbounded so a routing worker never
/// blocks on another peer's socket.
pub type ClientTx = mpsc::UnboundedSender<Message>;

// =============================================================================
// INVOCATIONS
// =============================================================================

/// One `Invoke` forwarded to a service owner and not yet answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub caller_id: String,
    pub caller_request_id: String,
    pub owner_id: String,
    /// Broker-generated id the owner sees in place of the caller's.
    pub service_request_id: String,
    pub endpoint: String,
}

/// Correlation table for forwarded invocations.
///
/// Keyed by `(owner, service_request_id)` so only the owner can complete an
/// entry; a second index on `(caller, caller_request_id)` enforces request-id
/// uniqueness per caller.
#[derive(Debug, Default)]
pub struct InvocationTable {
    by_owner: HashMap<(String, String), Invocation>,
    by_caller: HashSet<(String, String)>,
}

impl InvocationTable {
    /// Record a forwarded invocation.
    ///
    /// # Errors
    ///
    /// Returns the invocation back when the caller already has a pending
    /// request with the same id.
    pub fn insert(&mut self, invocation: Invocation) -> Result<(), Invocation> {
        let caller_key = (invocation.caller_id.clone(), invocation.caller_request_id.clone());
        if self.by_caller.contains(&caller_key) {
            return Err(invocation);
        }
        self.by_caller.insert(caller_key);
        let owner_key = (invocation.owner_id.clone(), invocation.service_request_id.clone());
        self.by_owner.insert(owner_key, invocation);
        Ok(())
    }

    /// Remove and return the entry answered by `owner_id`.
    pub fn complete(&mut self, owner_id: &str, service_request_id: &str) -> Option<Invocation> {
        let invocation = self.by_owner.remove(&(owner_id.to_owned(), service_request_id.to_owned()))?;
        self.by_caller.remove(&(invocation.caller_id.clone(), invocation.caller_request_id.clone()));
        Some(invocation)
    }

    /// Drop every entry that involves `client_id` and return the ones whose
    /// caller is still waiting on an answer from it.
    pub fn remove_client(&mut self, client_id: &str) -> Vec<Invocation> {
        let mut orphaned = Vec::new();
        self.by_owner.retain(|_, inv| {
            if inv.owner_id != client_id && inv.caller_id != client_id {
                return true;
            }
            if inv.caller_id != client_id {
                orphaned.push(inv.clone());
            }
            false
        });
        self.by_caller.retain(|(caller, _)| caller != client_id);
        for inv in &orphaned {
            self.by_caller.remove(&(inv.caller_id.clone(), inv.caller_request_id.clone()));
        }
        orphaned
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_owner.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_owner.is_empty()
    }
}

// =============================================================================
// BROKER STATE
// =============================================================================

/// Shared broker state. Clone is required by Axum; all fields are Arc-wrapped.
#[derive(Clone)]
pub struct BrokerState {
    pub config: Arc<BrokerConfig>,
    pub validator: Option<Arc<dyn AccessTokenValidator>>,
    pub clients: Arc<RwLock<HashMap<String, ClientTx>>>,
    pub topics: Arc<RwLock<HashMap<Topic, HashSet<String>>>>,
    pub services: Arc<RwLock<HashMap<String, String>>>,
    pub invocations: Arc<Mutex<InvocationTable>>,
}

impl BrokerState {
    #[must_use]
    pub fn new(config: BrokerConfig, validator: Option<Arc<dyn AccessTokenValidator>>) -> Self {
        Self {
            config: Arc::new(config),
            validator,
            clients: Arc::new(RwLock::new(HashMap::new())),
            topics: Arc::new(RwLock::new(HashMap::new())),
            services: Arc::new(RwLock::new(HashMap::new())),
            invocations: Arc::new(Mutex::new(InvocationTable::default())),
        }
    }

    /// Queue a message on a live client's connection. Returns whether it was queued.
    pub async fn send_to(&self, client_id: &str, message: Message) -> bool {
        let clients = self.clients.read().await;
        clients.get(client_id).is_some_and(|tx| tx.send(message).is_ok())
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================


#[cfg(test)]
#[path = "state_test.rs"]
mod tests;

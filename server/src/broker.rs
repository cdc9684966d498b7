//! Broker: connection workers and message dispatch.
//!
//! DESIGN
//! ======
//! One worker task per connection. After the handshake it enters a `select!`
//! loop over:
//! - inbound messages from its own peer -> dispatch
//! - messages other workers queued for this peer -> forward to the socket
//! - broker shutdown
//!
//! Handler functions validate, mutate shared tables, and return an
//! `Outcome` or an error response. Only the worker writes to the socket,
//! and inbound message N is fully routed before N+1 is read.
//!
//! LIFECYCLE
//! =========
//! 1. `Connecting`: first message must be `Connect`, within the handshake timeout
//! 2. Token check (if configured) -> `ConnectResponse` with client id or error
//! 3. `Connected`: dispatch until the peer leaves, misbehaves, or shutdown
//! 4. `Disconnected`: table cleanup, orphaned callers notified

use std::sync::Arc;

use frames::{ErrorInfo, Message};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::{self, AccessTokenValidator};
use crate::config::BrokerConfig;
use crate::services::invoke::{self, InvokeRequest};
use crate::services::session::{self, Session, SessionState};
use crate::services::topic::{self, Publication};
use crate::services::registry;
use crate::state::BrokerState;
use crate::transport::{ChannelClientConnection, ClientConnection, TransportError};

// =============================================================================
// OUTCOME
// =============================================================================

/// What the worker does after a handler ran.
#[derive(Debug)]
enum Outcome {
    /// Send this message back to the sender.
    Reply(Message),
    /// Nothing goes back to the sender.
    Silent,
    /// The peer broke the protocol; end the session.
    Close(&'static str),
}

// =============================================================================
// BROKER
// =============================================================================

/// A broker instance. Cheap to clone; clones share tables and shutdown.
#[derive(Clone)]
pub struct Broker {
    state: BrokerState,
    shutdown: Arc<watch::Sender<bool>>,
}

impl Broker {
    /// Broker with the token validator implied by `config`.
    #[must_use]
    pub fn new(config: BrokerConfig) -> Self {
        let validator = auth::validator_from_config(&config);
        Self::from_state(BrokerState::new(config, validator))
    }

    /// Broker with a caller-supplied token validator.
    #[must_use]
    pub fn with_validator(config: BrokerConfig, validator: Arc<dyn AccessTokenValidator>) -> Self {
        Self::from_state(BrokerState::new(config, Some(validator)))
    }

    fn from_state(state: BrokerState) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self { state, shutdown: Arc::new(shutdown) }
    }

    #[must_use]
    pub fn state(&self) -> &BrokerState {
        &self.state
    }

    /// Stop every connection worker. Each runs its cleanup before exiting.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    pub async fn client_count(&self) -> usize {
        self.state.clients.read().await.len()
    }

    /// Current owner of `endpoint`, if any.
    pub async fn service_owner(&self, endpoint: &str) -> Option<String> {
        registry::owner_of(&self.state, endpoint).await
    }

    /// Attach an in-process peer. Returns the peer's ends: a sender for
    /// messages to the broker and a receiver for messages from it.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn connect_in_process(&self) -> (mpsc::UnboundedSender<Message>, mpsc::UnboundedReceiver<Message>) {
        let (to_broker, inbound) = mpsc::unbounded_channel();
        let (outbound, from_broker) = mpsc::unbounded_channel();
        let broker = self.clone();
        tokio::spawn(async move {
            broker.serve_connection(ChannelClientConnection::new(inbound, outbound)).await;
        });
        (to_broker, from_broker)
    }

    /// Run one connection to completion.
    pub async fn serve_connection<C: ClientConnection>(&self, mut conn: C) {
        let mut shutdown_rx = self.shutdown.subscribe();
        if *shutdown_rx.borrow_and_update() {
            conn.close().await;
            return;
        }

        let mut session = Session::new(Uuid::new_v4().simple().to_string());
        let Some(mut client_rx) = self.handshake(&mut conn, &mut session).await else {
            conn.close().await;
            return;
        };

        info!(client_id = %session.client_id, "broker: client connected");

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    debug!(client_id = %session.client_id, "broker: shutdown");
                    break;
                }
                inbound = conn.receive() => {
                    let message = match inbound {
                        Ok(message) => message,
                        Err(TransportError::Closed) => break,
                        Err(e) => {
                            warn!(client_id = %session.client_id, error = %e, "broker: closing connection");
                            break;
                        }
                    };
                    match self.dispatch(&mut session, message).await {
                        Outcome::Reply(reply) => {
                            if conn.send(reply).await.is_err() {
                                break;
                            }
                        }
                        Outcome::Silent => {}
                        Outcome::Close(reason) => {
                            warn!(client_id = %session.client_id, %reason, "broker: protocol violation");
                            break;
                        }
                    }
                }
                Some(message) = client_rx.recv() => {
                    if conn.send(message).await.is_err() {
                        break;
                    }
                }
            }
        }

        session::disconnect(&self.state, &mut session).await;
        conn.close().await;
        info!(client_id = %session.client_id, "broker: client disconnected");
    }

    /// Wait for `Connect`, check the token, publish the client. Returns the
    /// client's outbound queue on success.
    async fn handshake<C: ClientConnection>(
        &self,
        conn: &mut C,
        session: &mut Session,
    ) -> Option<mpsc::UnboundedReceiver<Message>> {
        let first = match timeout(self.state.config.handshake_timeout, conn.receive()).await {
            Ok(Ok(message)) => message,
            Ok(Err(e)) => {
                debug!(error = %e, "broker: connection ended before handshake");
                return None;
            }
            Err(_) => {
                warn!("broker: handshake timed out");
                return None;
            }
        };

        let Message::Connect { access_token } = first else {
            warn!(kind = first.kind(), "broker: expected Connect as first message");
            return None;
        };

        if let Some(validator) = &self.state.validator {
            if let Err(e) = validator.validate(&session.client_id, access_token.as_deref()).await {
                warn!(client_id = %session.client_id, error = %e, "broker: access token rejected");
                let reply = Message::ConnectResponse { client_id: None, error: Some(ErrorInfo::from_error(&e)) };
                let _ = conn.send(reply).await;
                return None;
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.state.clients.write().await.insert(session.client_id.clone(), tx);
        session.state = SessionState::Connected;

        let reply = Message::ConnectResponse { client_id: Some(session.client_id.clone()), error: None };
        if conn.send(reply).await.is_err() {
            session::disconnect(&self.state, session).await;
            return None;
        }
        Some(rx)
    }

    // =========================================================================
    // DISPATCH
    // =========================================================================

    async fn dispatch(&self, session: &mut Session, message: Message) -> Outcome {
        debug!(client_id = %session.client_id, kind = message.kind(), "broker: recv");
        match self.handle(session, message).await {
            Ok(outcome) => outcome,
            Err(reply) => Outcome::Reply(reply),
        }
    }

    async fn handle(&self, session: &mut Session, message: Message) -> Result<Outcome, Message> {
        let state = &self.state;
        match message {
            Message::Subscribe { topic } => {
                topic::subscribe(state, session, topic).await;
                Ok(Outcome::Silent)
            }
            Message::Unsubscribe { topic } => {
                topic::unsubscribe(state, session, &topic).await;
                Ok(Outcome::Silent)
            }
            Message::Publish { topic, payload, scope, correlation_id } => {
                let publication = Publication { topic, payload, scope, correlation_id };
                topic::publish(state, &session.client_id, publication).await;
                Ok(Outcome::Silent)
            }
            Message::RegisterService { request_id, endpoint } => {
                let error = registry::register(state, session, &endpoint)
                    .await
                    .err()
                    .map(|e| ErrorInfo::from_error(&e));
                Ok(Outcome::Reply(Message::RegisterServiceResponse { request_id, error }))
            }
            Message::UnregisterService { request_id, endpoint } => {
                registry::unregister(state, session, &endpoint).await;
                Ok(Outcome::Reply(Message::UnregisterServiceResponse { request_id, error: None }))
            }
            Message::Invoke { request_id, endpoint, payload, scope, correlation_id, .. } => {
                let reply_id = request_id.clone();
                let request = InvokeRequest { request_id, endpoint, payload, scope, correlation_id };
                match invoke::invoke(state, &session.client_id, request).await {
                    Ok(()) => Ok(Outcome::Silent),
                    Err(e) => {
                        debug!(client_id = %session.client_id, error = %e, "broker: invoke failed");
                        Err(Message::invoke_err(reply_id, ErrorInfo::from_error(&e)))
                    }
                }
            }
            Message::InvokeResponse { request_id, payload, error } => {
                invoke::respond(state, &session.client_id, &request_id, payload, error).await;
                Ok(Outcome::Silent)
            }
            Message::Connect { .. } => Ok(Outcome::Close("Connect after handshake")),
            Message::ConnectResponse { .. }
            | Message::Update { .. }
            | Message::RegisterServiceResponse { .. }
            | Message::UnregisterServiceResponse { .. } => Ok(Outcome::Close("broker-only message from client")),
        }
    }
}

#[cfg(test)]
#[path = "broker_test.rs"]
mod tests;

//! Client lifecycle and message routing.
//!
//! DESIGN
//! ======
//! `Client` is a cheap handle around shared state. After the handshake one
//! IO task owns the [`Connection`] and runs a `select!` loop over:
//! - the outbound queue -> `Connection::send`
//! - `Connection::receive` -> route to a pending waiter, a subscriber queue,
//!   or a service handler task
//!
//! API calls never touch the socket; they push onto the outbound queue and,
//! for request/response operations, wait on a oneshot in the pending table.
//! The IO task holds only a `Weak` to the shared state, so dropping every
//! `Client` ends the task.
//!
//! LIFECYCLE
//! =========
//! 1. `NotConnected`: created with an unconnected transport
//! 2. `Connecting`: transport setup and `Connect`/`ConnectResponse`, serialized
//! 3. `Connected`: operations flow
//! 4. `Closing`: local `close()` unregistering services and flushing the queue
//! 5. `Closed`: pending requests and subscribers are failed with the reason
//!    (`ConnectionClosed` for a local close, `ConnectionAborted` otherwise)
//!
//! LOCK ORDER
//! ==========
//! `topics` before `link`. No lock is held across an await.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use frames::{Buffer, ErrorInfo, Message, MessageScope, Topic, codes, validate_endpoint};
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ClientOptions;
use crate::error::ClientError;
use crate::pending::PendingTable;
use crate::service::{self, ServiceHandler, ServiceRequest};
use crate::subscription::{self, SubscriberEvent, SubscriberTx, Subscription, TopicHandler, TopicMessage};
use crate::transport::{Connection, Encoding, TransportError, WsConnection};

/// Bound on each `UnregisterService` acknowledgement during `close()`.
const CLOSE_ACK_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    NotConnected,
    Connecting,
    Connected,
    Closing,
    Closed,
}

#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    pub scope: MessageScope,
    pub correlation_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct InvokeOptions {
    /// Falls back to [`ClientOptions::invoke_timeout`].
    pub timeout: Option<Duration>,
    /// `ClientId(id)` invokes that client directly, bypassing the registry.
    pub scope: MessageScope,
    pub correlation_id: Option<String>,
    /// Caller-chosen request id. Generated when absent.
    pub request_id: Option<String>,
}

// =============================================================================
// SHARED STATE
// =============================================================================

enum Link {
    NotConnected,
    Connecting,
    Connected {
        client_id: String,
        outbound: mpsc::UnboundedSender<Message>,
        io: Option<JoinHandle<()>>,
    },
    Closing,
    Closed(ClientError),
}

struct ServiceEntry {
    handler: Arc<dyn ServiceHandler>,
    /// Registered with the broker, as opposed to a local endpoint.
    published: bool,
}

pub(crate) struct ClientInner {
    options: ClientOptions,
    /// Unconnected transport until the handshake succeeds. The lock also
    /// serializes `connect` and `close`.
    transport: AsyncMutex<Option<Box<dyn Connection>>>,
    link: Mutex<Link>,
    pending: Mutex<PendingTable>,
    topics: Mutex<HashMap<Topic, HashMap<u64, SubscriberTx>>>,
    services: Mutex<HashMap<String, ServiceEntry>>,
    next_subscriber: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn new_request_id() -> String {
    Uuid::new_v4().simple().to_string()
}

impl ClientInner {
    /// Queue a message for the IO task.
    pub(crate) fn send(&self, message: Message) -> Result<(), ClientError> {
        match &*lock(&self.link) {
            Link::Connected { outbound, .. } => outbound.send(message).map_err(|_| ClientError::ConnectionAborted),
            Link::Closed(reason) => Err(reason.clone()),
            Link::NotConnected | Link::Connecting | Link::Closing => Err(ClientError::ConnectionClosed),
        }
    }

    pub(crate) fn remove_subscriber(&self, topic: &Topic, id: u64) {
        let mut topics = lock(&self.topics);
        let Some(subscribers) = topics.get_mut(topic) else {
            return;
        };
        subscribers.remove(&id);
        if subscribers.is_empty() {
            topics.remove(topic);
            if let Err(e) = self.send(Message::Unsubscribe { topic: topic.clone() }) {
                debug!(%topic, error = %e, "client: unsubscribe not sent");
            }
        }
    }

    fn route(self: &Arc<Self>, message: Message) {
        match message {
            Message::Update { topic, payload, scope, source_id, correlation_id } => {
                let topics = lock(&self.topics);
                let Some(subscribers) = topics.get(&topic) else {
                    debug!(%topic, "client: update without local subscriber");
                    return;
                };
                let update = TopicMessage { topic: topic.clone(), payload, source_id, scope, correlation_id };
                for queue in subscribers.values() {
                    let _ = queue.send(SubscriberEvent::Update(update.clone()));
                }
            }
            Message::Invoke { request_id, endpoint, payload, scope, source_id, correlation_id } => {
                let request = ServiceRequest { endpoint, payload, source_id, scope, correlation_id };
                self.serve_invoke(request_id, request);
            }
            Message::InvokeResponse { .. }
            | Message::RegisterServiceResponse { .. }
            | Message::UnregisterServiceResponse { .. } => {
                let Some(request_id) = message.request_id().map(str::to_owned) else {
                    debug!(kind = message.kind(), "client: reply without request id");
                    return;
                };
                if !lock(&self.pending).complete(&request_id, message) {
                    debug!(%request_id, "client: dropping reply for unknown request");
                }
            }
            other => warn!(kind = other.kind(), "client: unexpected message from broker"),
        }
    }

    fn serve_invoke(self: &Arc<Self>, request_id: String, request: ServiceRequest) {
        let handler = lock(&self.services)
            .get(&request.endpoint)
            .filter(|entry| entry.published || request.scope.client_id().is_some())
            .map(|entry| entry.handler.clone());

        let Some(handler) = handler else {
            let error = ErrorInfo::new(codes::UNKNOWN_SERVICE, format!("unknown service: {}", request.endpoint));
            let _ = self.send(Message::invoke_err(request_id, error));
            return;
        };

        let client = Arc::downgrade(self);
        tokio::spawn(async move {
            let endpoint = request.endpoint.clone();
            let reply = match service::run(handler, request).await {
                Ok(payload) => Message::invoke_ok(request_id, payload),
                Err(error) => {
                    debug!(%endpoint, %error, "client: service handler failed");
                    Message::invoke_err(request_id, error)
                }
            };
            if let Some(client) = client.upgrade() {
                if let Err(e) = client.send(reply) {
                    debug!(%endpoint, error = %e, "client: invoke response not sent");
                }
            }
        });
    }

    /// Serialized by the transport lock. Runs on its own task.
    async fn connect(self: &Arc<Self>) -> Result<String, ClientError> {
        let mut slot = self.transport.lock().await;
        match &*lock(&self.link) {
            Link::Connected { client_id, .. } => return Ok(client_id.clone()),
            Link::Closed(reason) => return Err(reason.clone()),
            Link::Closing => return Err(ClientError::ConnectionClosed),
            Link::NotConnected | Link::Connecting => {}
        }
        let Some(mut conn) = slot.take() else {
            return Err(ClientError::ConnectionClosed);
        };
        *lock(&self.link) = Link::Connecting;

        let deadline = self.options.connect_timeout;
        let token = self.options.access_token.clone();
        let outcome = match timeout(deadline, handshake(conn.as_mut(), token)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ClientError::Timeout(deadline)),
        };

        let client_id = match outcome {
            Ok(client_id) => client_id,
            Err(e) => {
                warn!(error = %e, "client: connect failed");
                conn.close().await;
                *lock(&self.link) = Link::Closed(e.clone());
                return Err(e);
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        *lock(&self.link) = Link::Connected { client_id: client_id.clone(), outbound: tx, io: None };
        let io = tokio::spawn(run_io(Arc::downgrade(self), conn, rx));
        if let Link::Connected { io: handle, .. } = &mut *lock(&self.link) {
            *handle = Some(io);
        }

        info!(%client_id, "client: connected");
        Ok(client_id)
    }

    /// Move to `Closed` and release everything waiting on the connection.
    fn teardown(&self, reason: ClientError) {
        {
            let mut link = lock(&self.link);
            if matches!(*link, Link::Closed(_)) {
                return;
            }
            *link = Link::Closed(reason.clone());
        }

        let failed = {
            let mut pending = lock(&self.pending);
            let failed = pending.len();
            pending.fail_all(&reason);
            failed
        };
        let subscribers: Vec<SubscriberTx> =
            lock(&self.topics).drain().flat_map(|(_, subs)| subs.into_values()).collect();
        for queue in subscribers {
            let _ = queue.send(SubscriberEvent::Closed(reason.clone()));
        }
        lock(&self.services).clear();

        match reason {
            ClientError::ConnectionClosed => info!(failed, "client: closed"),
            _ => warn!(%reason, failed, "client: connection lost"),
        }
    }
}

// =============================================================================
// IO TASK
// =============================================================================

async fn run_io(
    client: Weak<ClientInner>,
    mut conn: Box<dyn Connection>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
) {
    let reason = loop {
        tokio::select! {
            outgoing = outbound.recv() => {
                let Some(message) = outgoing else {
                    break ClientError::ConnectionClosed;
                };
                if let Err(e) = conn.send(message).await {
                    warn!(error = %e, "client: send failed");
                    break ClientError::ConnectionAborted;
                }
            }
            incoming = conn.receive() => {
                match incoming {
                    Ok(message) => {
                        let Some(client) = client.upgrade() else {
                            break ClientError::ConnectionClosed;
                        };
                        client.route(message);
                    }
                    Err(TransportError::Closed) => break ClientError::ConnectionAborted,
                    Err(e) => {
                        warn!(error = %e, "client: receive failed");
                        break ClientError::ConnectionAborted;
                    }
                }
            }
        }
    };

    conn.close().await;
    if let Some(client) = client.upgrade() {
        client.teardown(reason);
    }
}

async fn handshake(conn: &mut dyn Connection, access_token: Option<String>) -> Result<String, ClientError> {
    conn.connect().await.map_err(|e| ClientError::ConnectionFailed(e.to_string()))?;
    conn.send(Message::Connect { access_token })
        .await
        .map_err(|e| ClientError::ConnectionFailed(e.to_string()))?;

    loop {
        match conn.receive().await {
            Ok(Message::ConnectResponse { error: Some(error), .. }) => return Err(error.into()),
            Ok(Message::ConnectResponse { client_id: Some(client_id), .. }) => return Ok(client_id),
            Ok(Message::ConnectResponse { .. }) => {
                return Err(ClientError::Protocol("ConnectResponse without client id".into()));
            }
            Ok(other) => debug!(kind = other.kind(), "client: ignoring message before ConnectResponse"),
            Err(e) => return Err(ClientError::ConnectionFailed(e.to_string())),
        }
    }
}

// =============================================================================
// CLIENT
// =============================================================================

/// Handle to one broker connection. Clones share the connection.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Client over `connection`, which is established on first use.
    pub fn new(connection: impl Connection + 'static, options: ClientOptions) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                options,
                transport: AsyncMutex::new(Some(Box::new(connection))),
                link: Mutex::new(Link::NotConnected),
                pending: Mutex::new(PendingTable::default()),
                topics: Mutex::new(HashMap::new()),
                services: Mutex::new(HashMap::new()),
                next_subscriber: AtomicU64::new(1),
            }),
        }
    }

    /// Client over a JSON WebSocket to `options.url`.
    #[must_use]
    pub fn websocket(options: ClientOptions) -> Self {
        let connection = WsConnection::new(options.url.clone(), Encoding::Json);
        Self::new(connection, options)
    }

    #[must_use]
    pub fn state(&self) -> ClientState {
        match &*lock(&self.inner.link) {
            Link::NotConnected => ClientState::NotConnected,
            Link::Connecting => ClientState::Connecting,
            Link::Connected { .. } => ClientState::Connected,
            Link::Closing => ClientState::Closing,
            Link::Closed(_) => ClientState::Closed,
        }
    }

    /// Id the broker assigned at connect time.
    #[must_use]
    pub fn client_id(&self) -> Option<String> {
        match &*lock(&self.inner.link) {
            Link::Connected { client_id, .. } => Some(client_id.clone()),
            _ => None,
        }
    }

    /// Establish the connection and return the assigned client id. A no-op
    /// when already connected.
    ///
    /// # Errors
    ///
    /// `ConnectionFailed` when the transport cannot be set up, `Unauthorized`
    /// when the broker rejects the access token, `Timeout` past
    /// `connect_timeout`. A failed client stays closed and keeps returning
    /// the same error.
    pub async fn connect(&self) -> Result<String, ClientError> {
        match &*lock(&self.inner.link) {
            Link::Connected { client_id, .. } => return Ok(client_id.clone()),
            Link::Closed(reason) => return Err(reason.clone()),
            Link::NotConnected | Link::Connecting | Link::Closing => {}
        }

        // The handshake owns the transport, so it runs to completion even if
        // this future is dropped.
        let inner = Arc::clone(&self.inner);
        match tokio::spawn(async move { inner.connect().await }).await {
            Ok(outcome) => outcome,
            Err(e) => Err(ClientError::ConnectionFailed(e.to_string())),
        }
    }

    /// Subscribe `handler` to `topic`. Only the first local subscriber of a
    /// topic sends `Subscribe` to the broker.
    ///
    /// # Errors
    ///
    /// `InvalidTopic` for a malformed name, or any `connect` failure.
    pub async fn subscribe(&self, topic: &str, handler: impl TopicHandler) -> Result<Subscription, ClientError> {
        let topic = Topic::parse(topic)?;
        self.connect().await?;

        let id = self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed);
        let queue = subscription::spawn_subscriber(topic.clone(), Arc::new(handler));
        {
            let mut topics = lock(&self.inner.topics);
            let subscribers = topics.entry(topic.clone()).or_default();
            subscribers.insert(id, queue);
            if subscribers.len() == 1 {
                if let Err(e) = self.inner.send(Message::Subscribe { topic: topic.clone() }) {
                    topics.remove(&topic);
                    return Err(e);
                }
            }
        }

        debug!(%topic, subscriber = id, "client: subscribed");
        Ok(Subscription::new(Arc::downgrade(&self.inner), topic, id))
    }

    /// Publish `payload` to every subscriber of `topic`.
    ///
    /// # Errors
    ///
    /// `InvalidTopic`, or a connection failure. Success means the broker
    /// connection accepted the message, not that anyone received it.
    pub async fn publish(&self, topic: &str, payload: impl Into<Buffer>) -> Result<(), ClientError> {
        self.publish_with(topic, Some(payload.into()), PublishOptions::default()).await
    }

    /// # Errors
    ///
    /// Same as [`Client::publish`].
    pub async fn publish_with(
        &self,
        topic: &str,
        payload: Option<Buffer>,
        options: PublishOptions,
    ) -> Result<(), ClientError> {
        let topic = Topic::parse(topic)?;
        self.connect().await?;
        let PublishOptions { scope, correlation_id } = options;
        self.inner.send(Message::Publish { topic, payload, scope, correlation_id })
    }

    /// Register `endpoint` with the broker and answer its invocations with
    /// `handler`.
    ///
    /// # Errors
    ///
    /// `DuplicateServiceName` when this client or another already owns the
    /// name, `InvalidEndpoint`, or a connection failure.
    pub async fn register_service(&self, endpoint: &str, handler: impl ServiceHandler) -> Result<(), ClientError> {
        validate_endpoint(endpoint)?;
        self.connect().await?;
        self.insert_handler(endpoint, Arc::new(handler), true)?;

        let message = Message::RegisterService { request_id: Some(new_request_id()), endpoint: endpoint.to_owned() };
        let outcome = match self.request(message, self.inner.options.invoke_timeout).await {
            Ok(Message::RegisterServiceResponse { error: None, .. }) => Ok(()),
            Ok(Message::RegisterServiceResponse { error: Some(error), .. }) => Err(error.into()),
            Ok(other) => Err(ClientError::Protocol(format!("unexpected {} for RegisterService", other.kind()))),
            Err(e) => Err(e),
        };

        match &outcome {
            Ok(()) => info!(%endpoint, "client: service registered"),
            Err(e) => {
                lock(&self.inner.services).remove(endpoint);
                debug!(%endpoint, error = %e, "client: service registration failed");
            }
        }
        outcome
    }

    /// Withdraw a registration. Unregistering a name this client does not
    /// own succeeds.
    ///
    /// # Errors
    ///
    /// Connection failures only.
    pub async fn unregister_service(&self, endpoint: &str) -> Result<(), ClientError> {
        self.connect().await?;
        {
            let mut services = lock(&self.inner.services);
            if services.get(endpoint).is_some_and(|entry| entry.published) {
                services.remove(endpoint);
            }
        }

        let message = Message::UnregisterService { request_id: Some(new_request_id()), endpoint: endpoint.to_owned() };
        match self.request(message, self.inner.options.invoke_timeout).await? {
            Message::UnregisterServiceResponse { error: Some(error), .. } => Err(error.into()),
            _ => Ok(()),
        }
    }

    /// Answer invocations addressed to this client by id without publishing
    /// `endpoint` in the broker's registry.
    ///
    /// # Errors
    ///
    /// `InvalidEndpoint`, or `DuplicateServiceName` when a local handler
    /// already uses the name.
    pub fn register_endpoint(&self, endpoint: &str, handler: impl ServiceHandler) -> Result<(), ClientError> {
        validate_endpoint(endpoint)?;
        self.insert_handler(endpoint, Arc::new(handler), false)
    }

    /// Returns whether a local endpoint was removed.
    pub fn unregister_endpoint(&self, endpoint: &str) -> bool {
        let mut services = lock(&self.inner.services);
        if services.get(endpoint).is_some_and(|entry| !entry.published) {
            services.remove(endpoint);
            return true;
        }
        false
    }

    /// Invoke `endpoint` and wait for its response payload.
    ///
    /// # Errors
    ///
    /// See [`Client::invoke_with`].
    pub async fn invoke(&self, endpoint: &str, payload: impl Into<Buffer>) -> Result<Option<Buffer>, ClientError> {
        self.invoke_with(endpoint, Some(payload.into()), InvokeOptions::default()).await
    }

    /// # Errors
    ///
    /// `UnknownService` when nobody owns the endpoint, `UnknownClient` for a
    /// targeted call to an absent client, `ServiceUnavailable` when the owner
    /// left mid-call, `Timeout`, `DuplicateRequestId` for a reused caller id,
    /// `ConnectionClosed`/`ConnectionAborted` when the connection ends, and
    /// `Remote` for handler-chosen error codes.
    pub async fn invoke_with(
        &self,
        endpoint: &str,
        payload: Option<Buffer>,
        options: InvokeOptions,
    ) -> Result<Option<Buffer>, ClientError> {
        validate_endpoint(endpoint)?;
        self.connect().await?;

        let InvokeOptions { timeout: deadline, scope, correlation_id, request_id } = options;
        let deadline = deadline.unwrap_or(self.inner.options.invoke_timeout);
        let message = Message::Invoke {
            request_id: request_id.unwrap_or_else(new_request_id),
            endpoint: endpoint.to_owned(),
            payload,
            scope,
            source_id: None,
            correlation_id,
        };

        match self.request(message, deadline).await? {
            Message::InvokeResponse { error: Some(error), .. } => Err(error.into()),
            Message::InvokeResponse { payload, .. } => Ok(payload),
            other => Err(ClientError::Protocol(format!("unexpected {} for Invoke", other.kind()))),
        }
    }

    /// Unregister services, unsubscribe, and release the connection. Pending
    /// requests fail with `ConnectionClosed`. Idempotent.
    pub async fn close(&self) {
        let mut slot = self.inner.transport.lock().await;
        if matches!(&*lock(&self.inner.link), Link::NotConnected | Link::Connecting) {
            if let Some(mut conn) = slot.take() {
                conn.close().await;
            }
            self.inner.teardown(ClientError::ConnectionClosed);
            return;
        }
        if !matches!(&*lock(&self.inner.link), Link::Connected { .. }) {
            return;
        }

        let published: Vec<String> = lock(&self.inner.services)
            .iter()
            .filter(|(_, entry)| entry.published)
            .map(|(name, _)| name.clone())
            .collect();
        for endpoint in published {
            let message = Message::UnregisterService { request_id: Some(new_request_id()), endpoint: endpoint.clone() };
            if let Err(e) = self.request(message, CLOSE_ACK_TIMEOUT).await {
                debug!(%endpoint, error = %e, "client: unregister on close failed");
            }
        }

        {
            let topics = lock(&self.inner.topics);
            for topic in topics.keys() {
                let _ = self.inner.send(Message::Unsubscribe { topic: topic.clone() });
            }
        }

        // Dropping the outbound sender lets the IO task flush and stop.
        let io = {
            let mut link = lock(&self.inner.link);
            match std::mem::replace(&mut *link, Link::Closing) {
                Link::Connected { io, .. } => io,
                other => {
                    *link = other;
                    None
                }
            }
        };
        if let Some(io) = io {
            let _ = io.await;
        }
        self.inner.teardown(ClientError::ConnectionClosed);
    }

    // =========================================================================
    // HELPERS
    // =========================================================================

    fn insert_handler(
        &self,
        endpoint: &str,
        handler: Arc<dyn ServiceHandler>,
        published: bool,
    ) -> Result<(), ClientError> {
        let mut services = lock(&self.inner.services);
        if services.contains_key(endpoint) {
            return Err(ClientError::DuplicateServiceName(format!("service already registered: {endpoint}")));
        }
        services.insert(endpoint.to_owned(), ServiceEntry { handler, published });
        Ok(())
    }

    /// Send a request carrying a request id and wait for its reply.
    async fn request(&self, message: Message, deadline: Duration) -> Result<Message, ClientError> {
        let Some(request_id) = message.request_id().map(str::to_owned) else {
            return Err(ClientError::Protocol(format!("{} carries no request id", message.kind())));
        };
        let reply = lock(&self.inner.pending).insert(&request_id)?;
        let mut waiter = PendingGuard { pending: &self.inner.pending, request_id: Some(request_id) };
        self.inner.send(message)?;

        match timeout(deadline, reply).await {
            Ok(Ok(outcome)) => {
                waiter.disarm();
                outcome
            }
            Ok(Err(_)) => {
                waiter.disarm();
                Err(ClientError::ConnectionAborted)
            }
            Err(_) => {
                debug!(request_id = ?waiter.request_id, "client: request timed out");
                Err(ClientError::Timeout(deadline))
            }
        }
    }
}

/// Removes a pending entry when its caller stops waiting before a reply.
struct PendingGuard<'a> {
    pending: &'a Mutex<PendingTable>,
    request_id: Option<String>,
}

impl PendingGuard<'_> {
    /// The entry was already removed by whoever resolved it.
    fn disarm(&mut self) {
        self.request_id = None;
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if let Some(request_id) = self.request_id.take() {
            lock(self.pending).cancel(&request_id);
        }
    }
}

#[cfg(test)]
#[path = "client_test.rs"]
mod tests;

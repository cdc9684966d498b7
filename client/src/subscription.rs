//! Topic subscriptions.
//!
//! DESIGN
//! ======
//! Every local subscriber gets its own unbounded queue drained by its own
//! task. The IO task only pushes into queues, so a slow handler delays
//! nothing but itself, and each handler still sees updates in arrival order.
//!
//! The broker sees one `Subscribe` per topic no matter how many local
//! subscribers share it; the last [`Subscription`] to go away sends the
//! matching `Unsubscribe`.

use std::future::Future;
use std::sync::{Arc, Weak};

use frames::{Buffer, MessageScope, Topic};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::client::ClientInner;
use crate::error::ClientError;
use crate::service::HandlerError;

/// One `Topic` update as delivered to a handler.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicMessage {
    pub topic: Topic,
    pub payload: Option<Buffer>,
    /// Client id of the publisher.
    pub source_id: String,
    pub scope: MessageScope,
    pub correlation_id: Option<String>,
}

#[async_trait::async_trait]
pub trait TopicHandler: Send + Sync + 'static {
    /// Errors are logged and the subscription keeps running.
    async fn on_update(&self, message: TopicMessage) -> Result<(), HandlerError>;

    /// The client connection ended; no further updates follow.
    async fn on_closed(&self, _reason: ClientError) {}
}

/// Forward updates into a channel. Handy for consumers that prefer pulling.
#[async_trait::async_trait]
impl TopicHandler for mpsc::UnboundedSender<TopicMessage> {
    async fn on_update(&self, message: TopicMessage) -> Result<(), HandlerError> {
        self.send(message).map_err(|_| HandlerError::new("receiver dropped"))
    }
}

/// Adapt an async closure into a [`TopicHandler`].
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(TopicMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    HandlerFn(f)
}

pub struct HandlerFn<F>(F);

#[async_trait::async_trait]
impl<F, Fut> TopicHandler for HandlerFn<F>
where
    F: Fn(TopicMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn on_update(&self, message: TopicMessage) -> Result<(), HandlerError> {
        (self.0)(message).await
    }
}

// =============================================================================
// SUBSCRIBER QUEUE
// =============================================================================

pub(crate) enum SubscriberEvent {
    Update(TopicMessage),
    Closed(ClientError),
}

pub(crate) type SubscriberTx = mpsc::UnboundedSender<SubscriberEvent>;

/// Start the task that feeds `handler`. The task ends when the returned
/// sender is dropped or after delivering `Closed`.
pub(crate) fn spawn_subscriber(topic: Topic, handler: Arc<dyn TopicHandler>) -> SubscriberTx {
    let (tx, mut rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                SubscriberEvent::Update(message) => {
                    if let Err(e) = handler.on_update(message).await {
                        warn!(%topic, error = %e, "client: topic handler failed");
                    }
                }
                SubscriberEvent::Closed(reason) => {
                    handler.on_closed(reason).await;
                    break;
                }
            }
        }
        debug!(%topic, "client: subscriber stopped");
    });
    tx
}

// =============================================================================
// HANDLE
// =============================================================================

/// Live subscription. Dropping it, or calling [`Subscription::unsubscribe`],
/// stops delivery to its handler.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    client: Weak<ClientInner>,
    topic: Topic,
    id: u64,
    active: bool,
}

impl Subscription {
    pub(crate) fn new(client: Weak<ClientInner>, topic: Topic, id: u64) -> Self {
        Self { client, topic, id, active: true }
    }

    #[must_use]
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Some(client) = self.client.upgrade() {
            client.remove_subscriber(&self.topic, self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("topic", &self.topic).field("id", &self.id).finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "subscription_test.rs"]
mod tests;

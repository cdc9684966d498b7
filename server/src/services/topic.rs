//! Topic subscriptions and publish fan-out.
//!
//! DESIGN
//! ======
//! Subscribe/unsubscribe/publish have no response message, so invalid topic
//! names are logged and dropped instead of answered. Fan-out snapshots the
//! subscriber set, releases the topic lock, then queues one `Topic` message
//! per target on its outbound channel.

use frames::{Buffer, Message, MessageScope, Topic};
use tracing::{debug, warn};

use crate::services::session::Session;
use crate::state::BrokerState;

/// Add the session to the topic's subscribers. Idempotent.
pub async fn subscribe(state: &BrokerState, session: &mut Session, topic: Topic) {
    if !topic.is_valid() {
        warn!(client_id = %session.client_id, %topic, "broker: ignoring subscribe to invalid topic");
        return;
    }
    state
        .topics
        .write()
        .await
        .entry(topic.clone())
        .or_default()
        .insert(session.client_id.clone());
    debug!(client_id = %session.client_id, %topic, "broker: subscribed");
    session.topics.insert(topic);
}

/// Remove the session from the topic's subscribers. Never-subscribed is a no-op.
pub async fn unsubscribe(state: &BrokerState, session: &mut Session, topic: &Topic) {
    if !session.topics.remove(topic) {
        return;
    }
    let mut topics = state.topics.write().await;
    if let Some(subscribers) = topics.get_mut(topic) {
        subscribers.remove(&session.client_id);
        if subscribers.is_empty() {
            topics.remove(topic);
        }
    }
    debug!(client_id = %session.client_id, %topic, "broker: unsubscribed");
}

/// A publish request as received from one client.
pub struct Publication {
    pub topic: Topic,
    pub payload: Option<Buffer>,
    pub scope: MessageScope,
    pub correlation_id: Option<String>,
}

/// Deliver a publication to the current subscribers. Returns how many
/// outbound queues accepted it; zero subscribers is not an error.
pub async fn publish(state: &BrokerState, source_id: &str, publication: Publication) -> usize {
    let Publication { topic, payload, scope, correlation_id } = publication;
    if !topic.is_valid() {
        warn!(client_id = %source_id, %topic, "broker: ignoring publish to invalid topic");
        return 0;
    }

    let targets: Vec<String> = {
        let topics = state.topics.read().await;
        let Some(subscribers) = topics.get(&topic) else {
            return 0;
        };
        match scope.client_id() {
            Some(target) => subscribers.get(target).into_iter().cloned().collect(),
            None => subscribers
                .iter()
                .filter(|id| state.config.echo_to_publisher || id.as_str() != source_id)
                .cloned()
                .collect(),
        }
    };
    if targets.is_empty() {
        return 0;
    }

    let update = Message::Update { topic, payload, scope, source_id: source_id.to_owned(), correlation_id };
    let clients = state.clients.read().await;
    let mut delivered = 0;
    for target in &targets {
        if let Some(tx) = clients.get(target) {
            if tx.send(update.clone()).is_ok() {
                delivered += 1;
            }
        }
    }
    delivered
}

#[cfg(test)]
#[path = "topic_test.rs"]
mod tests;

use super::*;
use std::collections::{HashSet, VecDeque};
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use frames::{Buffer, CodecError, MessageScope, Topic, codes};
use tokio::time::{sleep, timeout};

use crate::auth::StaticTokenValidator;

// =============================================================================
// HELPERS
// =============================================================================

struct Peer {
    tx: mpsc::UnboundedSender<Message>,
    rx: mpsc::UnboundedReceiver<Message>,
    client_id: String,
}

impl Peer {
    fn send(&self, message: Message) {
        self.tx.send(message).expect("broker worker should be running");
    }

    async fn recv(&mut self) -> Message {
        recv(&mut self.rx).await
    }

    async fn assert_silent(&mut self) {
        assert!(timeout(Duration::from_millis(80), self.rx.recv()).await.is_err(), "expected no message");
    }

    /// Round trip on this connection so everything sent before is routed.
    async fn sync(&mut self) {
        self.send(Message::UnregisterService { request_id: Some("sync".into()), endpoint: "sync".into() });
        match self.recv().await {
            Message::UnregisterServiceResponse { request_id, error: None } => {
                assert_eq!(request_id.as_deref(), Some("sync"));
            }
            other => panic!("expected sync ack, got {other:?}"),
        }
    }

    async fn subscribe(&mut self, name: &str) {
        self.send(Message::Subscribe { topic: topic(name) });
        self.sync().await;
    }

    async fn register(&mut self, endpoint: &str) -> Option<ErrorInfo> {
        self.send(Message::RegisterService { request_id: Some(format!("reg-{endpoint}")), endpoint: endpoint.into() });
        match self.recv().await {
            Message::RegisterServiceResponse { error, .. } => error,
            other => panic!("expected RegisterServiceResponse, got {other:?}"),
        }
    }

    fn invoke(&self, request_id: &str, endpoint: &str, payload: &str) {
        self.send(invoke_msg(request_id, endpoint, payload, MessageScope::Default));
    }
}

fn topic(name: &str) -> Topic {
    Topic::parse(name).expect("valid topic")
}

fn invoke_msg(request_id: &str, endpoint: &str, payload: &str, scope: MessageScope) -> Message {
    Message::Invoke {
        request_id: request_id.into(),
        endpoint: endpoint.into(),
        payload: Some(Buffer::from(payload)),
        scope,
        source_id: None,
        correlation_id: None,
    }
}

fn publish_msg(name: &str, payload: &str, scope: MessageScope) -> Message {
    Message::Publish { topic: topic(name), payload: Some(Buffer::from(payload)), scope, correlation_id: None }
}

async fn recv(rx: &mut mpsc::UnboundedReceiver<Message>) -> Message {
    timeout(Duration::from_millis(500), rx.recv())
        .await
        .expect("receive timed out")
        .expect("connection closed unexpectedly")
}

async fn assert_closed(rx: &mut mpsc::UnboundedReceiver<Message>) {
    let next = timeout(Duration::from_millis(500), rx.recv()).await.expect("close timed out");
    assert!(next.is_none(), "expected connection to close, got {next:?}");
}

async fn connect_with(broker: &Broker, token: Option<&str>) -> Peer {
    let (tx, mut rx) = broker.connect_in_process();
    tx.send(Message::Connect { access_token: token.map(str::to_owned) }).expect("send connect");
    match recv(&mut rx).await {
        Message::ConnectResponse { client_id: Some(client_id), error: None } => Peer { tx, rx, client_id },
        other => panic!("expected successful ConnectResponse, got {other:?}"),
    }
}

async fn connect(broker: &Broker) -> Peer {
    connect_with(broker, None).await
}

async fn wait_for_clients(broker: &Broker, expected: usize) {
    for _ in 0..50 {
        if broker.client_count().await == expected {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("expected {expected} clients, have {}", broker.client_count().await);
}

fn error_kind(message: &Message) -> Option<&str> {
    match message {
        Message::InvokeResponse { error: Some(e), .. }
        | Message::ConnectResponse { error: Some(e), .. }
        | Message::RegisterServiceResponse { error: Some(e), .. } => Some(e.kind.as_str()),
        _ => None,
    }
}

// =============================================================================
// PUBLISH / SUBSCRIBE
// =============================================================================

#[tokio::test]
async fn publish_fans_out_to_subscribers_only() {
    let broker = Broker::new(BrokerConfig::default());
    let mut a = connect(&broker).await;
    let mut b = connect(&broker).await;
    let mut c = connect(&broker).await;
    let mut d = connect(&broker).await;
    b.subscribe("prices").await;
    c.subscribe("prices").await;

    a.send(publish_msg("prices", "AAPL=190", MessageScope::Default));

    for peer in [&mut b, &mut c] {
        match peer.recv().await {
            Message::Update { topic: t, payload, source_id, scope, .. } => {
                assert_eq!(t, topic("prices"));
                assert_eq!(payload, Some(Buffer::from("AAPL=190")));
                assert_eq!(source_id, a.client_id);
                assert!(scope.is_default());
            }
            other => panic!("expected Topic update, got {other:?}"),
        }
        peer.assert_silent().await;
    }
    a.assert_silent().await;
    d.assert_silent().await;
}

#[tokio::test]
async fn publish_echoes_to_subscribed_publisher_by_default() {
    let broker = Broker::new(BrokerConfig::default());
    let mut a = connect(&broker).await;
    a.subscribe("news").await;

    a.send(publish_msg("news", "hello", MessageScope::Default));
    assert!(matches!(a.recv().await, Message::Update { .. }));
}

#[tokio::test]
async fn publish_skips_publisher_when_echo_disabled() {
    let broker = Broker::new(BrokerConfig { echo_to_publisher: false, ..BrokerConfig::default() });
    let mut a = connect(&broker).await;
    let mut b = connect(&broker).await;
    a.subscribe("news").await;
    b.subscribe("news").await;

    a.send(publish_msg("news", "hello", MessageScope::Default));
    assert!(matches!(b.recv().await, Message::Update { .. }));
    a.assert_silent().await;
}

#[tokio::test]
async fn targeted_publish_reaches_only_the_subscribed_target() {
    let broker = Broker::new(BrokerConfig::default());
    let mut a = connect(&broker).await;
    let mut b = connect(&broker).await;
    let mut c = connect(&broker).await;
    let mut d = connect(&broker).await;
    b.subscribe("prices").await;
    c.subscribe("prices").await;

    a.send(publish_msg("prices", "for-c", MessageScope::client(c.client_id.clone())));
    match c.recv().await {
        Message::Update { scope, .. } => assert_eq!(scope, MessageScope::client(c.client_id.clone())),
        other => panic!("expected targeted update, got {other:?}"),
    }
    b.assert_silent().await;

    // D is connected but not subscribed: nobody receives it.
    a.send(publish_msg("prices", "for-d", MessageScope::client(d.client_id.clone())));
    b.assert_silent().await;
    c.assert_silent().await;
    d.assert_silent().await;
}

#[tokio::test]
async fn publish_without_subscribers_is_silent() {
    let broker = Broker::new(BrokerConfig::default());
    let mut a = connect(&broker).await;
    a.send(publish_msg("empty", "x", MessageScope::Default));
    a.sync().await;
    a.assert_silent().await;
}

#[tokio::test]
async fn unsubscribe_stops_delivery_and_prunes_topic() {
    let broker = Broker::new(BrokerConfig::default());
    let a = connect(&broker).await;
    let mut b = connect(&broker).await;
    b.subscribe("prices").await;

    b.send(Message::Unsubscribe { topic: topic("prices") });
    b.sync().await;
    assert!(broker.state().topics.read().await.is_empty());

    a.send(publish_msg("prices", "x", MessageScope::Default));
    b.assert_silent().await;
}

#[tokio::test]
async fn unsubscribe_of_unknown_topic_is_a_no_op() {
    let broker = Broker::new(BrokerConfig::default());
    let mut a = connect(&broker).await;
    a.send(Message::Unsubscribe { topic: topic("never") });
    a.sync().await;
    assert_eq!(broker.client_count().await, 1);
}

#[tokio::test]
async fn subscribe_twice_delivers_once() {
    let broker = Broker::new(BrokerConfig::default());
    let a = connect(&broker).await;
    let mut b = connect(&broker).await;
    b.subscribe("prices").await;
    b.subscribe("prices").await;

    a.send(publish_msg("prices", "x", MessageScope::Default));
    assert!(matches!(b.recv().await, Message::Update { .. }));
    b.assert_silent().await;
}

// =============================================================================
// SERVICE REGISTRY
// =============================================================================

#[tokio::test]
async fn endpoint_has_at_most_one_registrant() {
    let broker = Broker::new(BrokerConfig::default());
    let mut b = connect(&broker).await;
    let mut c = connect(&broker).await;

    assert_eq!(b.register("echo").await, None);
    let err = c.register("echo").await.expect("second registration should fail");
    assert_eq!(err.kind, codes::DUPLICATE_SERVICE_NAME);

    b.send(Message::UnregisterService { request_id: Some("u1".into()), endpoint: "echo".into() });
    assert!(matches!(b.recv().await, Message::UnregisterServiceResponse { error: None, .. }));

    assert_eq!(c.register("echo").await, None);
    assert_eq!(broker.service_owner("echo").await, Some(c.client_id.clone()));
}

#[tokio::test]
async fn registering_own_endpoint_twice_is_a_duplicate() {
    let broker = Broker::new(BrokerConfig::default());
    let mut b = connect(&broker).await;
    assert_eq!(b.register("echo").await, None);
    let err = b.register("echo").await.expect("duplicate");
    assert_eq!(err.kind, codes::DUPLICATE_SERVICE_NAME);
}

#[tokio::test]
async fn register_rejects_invalid_endpoint() {
    let broker = Broker::new(BrokerConfig::default());
    let mut b = connect(&broker).await;
    let err = b.register("  ").await.expect("invalid endpoint");
    assert_eq!(err.kind, codes::INVALID_ENDPOINT);
}

#[tokio::test]
async fn unregister_of_foreign_endpoint_is_acknowledged_and_ignored() {
    let broker = Broker::new(BrokerConfig::default());
    let mut b = connect(&broker).await;
    let mut c = connect(&broker).await;
    assert_eq!(b.register("echo").await, None);

    c.send(Message::UnregisterService { request_id: Some("u1".into()), endpoint: "echo".into() });
    match c.recv().await {
        Message::UnregisterServiceResponse { request_id, error } => {
            assert_eq!(request_id.as_deref(), Some("u1"));
            assert_eq!(error, None);
        }
        other => panic!("expected UnregisterServiceResponse, got {other:?}"),
    }
    assert_eq!(broker.service_owner("echo").await, Some(b.client_id.clone()));
}

// =============================================================================
// INVOKE
// =============================================================================

#[tokio::test]
async fn invoke_round_trip_rewrites_request_ids() {
    let broker = Broker::new(BrokerConfig::default());
    let mut a = connect(&broker).await;
    let mut b = connect(&broker).await;
    assert_eq!(b.register("echo").await, None);

    a.invoke("r1", "echo", "hi");
    let (service_request_id, payload) = match b.recv().await {
        Message::Invoke { request_id, endpoint, payload, source_id, .. } => {
            assert_eq!(endpoint, "echo");
            assert_eq!(source_id.as_deref(), Some(a.client_id.as_str()));
            assert_ne!(request_id, "r1");
            (request_id, payload)
        }
        other => panic!("expected forwarded Invoke, got {other:?}"),
    };

    b.send(Message::invoke_ok(service_request_id.clone(), payload));
    match a.recv().await {
        Message::InvokeResponse { request_id, payload, error } => {
            assert_eq!(request_id, "r1");
            assert_eq!(payload, Some(Buffer::from("hi")));
            assert_eq!(error, None);
        }
        other => panic!("expected InvokeResponse, got {other:?}"),
    }
    assert!(broker.state().invocations.lock().await.is_empty());

    // A late duplicate answer is dropped.
    b.send(Message::invoke_ok(service_request_id, Some(Buffer::from("again"))));
    b.sync().await;
    a.assert_silent().await;
}

#[tokio::test]
async fn invoke_carries_correlation_id_to_owner() {
    let broker = Broker::new(BrokerConfig::default());
    let a = connect(&broker).await;
    let mut b = connect(&broker).await;
    assert_eq!(b.register("echo").await, None);

    a.send(Message::Invoke {
        request_id: "r1".into(),
        endpoint: "echo".into(),
        payload: None,
        scope: MessageScope::Default,
        source_id: Some("spoofed".into()),
        correlation_id: Some("trace-1".into()),
    });
    match b.recv().await {
        Message::Invoke { correlation_id, source_id, .. } => {
            assert_eq!(correlation_id.as_deref(), Some("trace-1"));
            assert_eq!(source_id.as_deref(), Some(a.client_id.as_str()));
        }
        other => panic!("expected forwarded Invoke, got {other:?}"),
    }
}

#[tokio::test]
async fn invoke_unknown_service_fails() {
    let broker = Broker::new(BrokerConfig::default());
    let mut a = connect(&broker).await;
    a.invoke("r1", "missing", "x");
    let reply = a.recv().await;
    assert_eq!(reply.request_id(), Some("r1"));
    assert_eq!(error_kind(&reply), Some(codes::UNKNOWN_SERVICE));
}

#[tokio::test]
async fn invoke_invalid_endpoint_fails() {
    let broker = Broker::new(BrokerConfig::default());
    let mut a = connect(&broker).await;
    a.invoke("r1", "", "x");
    assert_eq!(error_kind(&a.recv().await), Some(codes::INVALID_ENDPOINT));
}

#[tokio::test]
async fn invoke_with_pending_request_id_fails() {
    let broker = Broker::new(BrokerConfig::default());
    let mut a = connect(&broker).await;
    let mut b = connect(&broker).await;
    assert_eq!(b.register("slow").await, None);

    a.invoke("r1", "slow", "one");
    assert!(matches!(b.recv().await, Message::Invoke { .. }));
    a.invoke("r1", "slow", "two");
    assert_eq!(error_kind(&a.recv().await), Some(codes::DUPLICATE_REQUEST_ID));
    b.assert_silent().await;
}

#[tokio::test]
async fn owner_disconnect_fails_pending_invocations() {
    let broker = Broker::new(BrokerConfig::default());
    let mut a = connect(&broker).await;
    let mut b = connect(&broker).await;
    let mut c = connect(&broker).await;
    assert_eq!(b.register("echo").await, None);

    a.invoke("r1", "echo", "hi");
    assert!(matches!(b.recv().await, Message::Invoke { .. }));
    drop(b);

    let reply = a.recv().await;
    assert_eq!(reply.request_id(), Some("r1"));
    assert_eq!(error_kind(&reply), Some(codes::SERVICE_UNAVAILABLE));

    wait_for_clients(&broker, 2).await;
    assert_eq!(broker.service_owner("echo").await, None);
    assert_eq!(c.register("echo").await, None);

    a.invoke("r2", "missing", "x");
    assert_eq!(error_kind(&a.recv().await), Some(codes::UNKNOWN_SERVICE));
}

#[tokio::test]
async fn caller_disconnect_discards_its_invocations() {
    let broker = Broker::new(BrokerConfig::default());
    let a = connect(&broker).await;
    let mut b = connect(&broker).await;
    assert_eq!(b.register("echo").await, None);

    a.invoke("r1", "echo", "hi");
    let Message::Invoke { request_id, .. } = b.recv().await else {
        panic!("expected forwarded Invoke");
    };
    drop(a);
    wait_for_clients(&broker, 1).await;
    assert!(broker.state().invocations.lock().await.is_empty());

    b.send(Message::invoke_ok(request_id, None));
    b.sync().await;
    assert_eq!(broker.client_count().await, 1);
}

#[tokio::test]
async fn targeted_invoke_reaches_client_without_registry_entry() {
    let broker = Broker::new(BrokerConfig::default());
    let mut a = connect(&broker).await;
    let mut b = connect(&broker).await;

    a.send(invoke_msg("r1", "local", "x", MessageScope::client(b.client_id.clone())));
    match b.recv().await {
        Message::Invoke { endpoint, scope, .. } => {
            assert_eq!(endpoint, "local");
            assert_eq!(scope.client_id(), Some(b.client_id.as_str()));
        }
        other => panic!("expected targeted Invoke, got {other:?}"),
    }

    a.send(invoke_msg("r2", "local", "x", MessageScope::client("nobody")));
    assert_eq!(error_kind(&a.recv().await), Some(codes::UNKNOWN_CLIENT));
}

#[tokio::test]
async fn service_error_is_forwarded_verbatim() {
    let broker = Broker::new(BrokerConfig::default());
    let mut a = connect(&broker).await;
    let mut b = connect(&broker).await;
    assert_eq!(b.register("fail").await, None);

    a.invoke("r1", "fail", "x");
    let Message::Invoke { request_id, .. } = b.recv().await else {
        panic!("expected forwarded Invoke");
    };
    b.send(Message::invoke_err(request_id, ErrorInfo::new(codes::HANDLER_FAILED, "boom")));
    let reply = a.recv().await;
    assert_eq!(error_kind(&reply), Some(codes::HANDLER_FAILED));
}

// =============================================================================
// LIFECYCLE
// =============================================================================

#[tokio::test]
async fn disconnect_removes_subscriptions() {
    let broker = Broker::new(BrokerConfig::default());
    let mut b = connect(&broker).await;
    b.subscribe("prices").await;
    assert_eq!(broker.state().topics.read().await.len(), 1);

    drop(b);
    wait_for_clients(&broker, 0).await;
    assert!(broker.state().topics.read().await.is_empty());
}

#[tokio::test]
async fn rejected_token_gets_error_response_then_close() {
    let validator = Arc::new(StaticTokenValidator::new(["secret"]));
    let broker = Broker::with_validator(BrokerConfig::default(), validator);

    let (tx, mut rx) = broker.connect_in_process();
    tx.send(Message::Connect { access_token: Some("wrong".into()) }).unwrap();
    let reply = recv(&mut rx).await;
    assert!(matches!(&reply, Message::ConnectResponse { client_id: None, .. }));
    assert_eq!(error_kind(&reply), Some(codes::UNAUTHORIZED));
    assert_closed(&mut rx).await;
    assert_eq!(broker.client_count().await, 0);

    let peer = connect_with(&broker, Some("secret")).await;
    assert!(!peer.client_id.is_empty());
}

#[tokio::test]
async fn tokens_from_config_are_enforced() {
    let broker = Broker::new(BrokerConfig { access_tokens: vec!["t0k".into()], ..BrokerConfig::default() });
    let (tx, mut rx) = broker.connect_in_process();
    tx.send(Message::Connect { access_token: None }).unwrap();
    assert_eq!(error_kind(&recv(&mut rx).await), Some(codes::UNAUTHORIZED));
    connect_with(&broker, Some("t0k")).await;
}

#[tokio::test]
async fn message_before_connect_closes_connection() {
    let broker = Broker::new(BrokerConfig::default());
    let (tx, mut rx) = broker.connect_in_process();
    tx.send(Message::Subscribe { topic: topic("prices") }).unwrap();
    assert_closed(&mut rx).await;
    assert_eq!(broker.client_count().await, 0);
}

#[tokio::test]
async fn second_connect_closes_connection() {
    let broker = Broker::new(BrokerConfig::default());
    let mut a = connect(&broker).await;
    a.send(Message::Connect { access_token: None });
    assert_closed(&mut a.rx).await;
    wait_for_clients(&broker, 0).await;
}

#[tokio::test]
async fn broker_only_message_from_client_closes_connection() {
    let broker = Broker::new(BrokerConfig::default());
    let other = connect(&broker).await;
    let mut a = connect(&broker).await;
    a.send(Message::Update {
        topic: topic("t"),
        payload: None,
        scope: MessageScope::Default,
        source_id: "me".into(),
        correlation_id: None,
    });
    assert_closed(&mut a.rx).await;
    wait_for_clients(&broker, 1).await;
    assert!(broker.state().clients.read().await.contains_key(&other.client_id));
}

#[tokio::test]
async fn silent_connection_times_out_in_handshake() {
    let broker = Broker::new(BrokerConfig { handshake_timeout: Duration::from_millis(50), ..BrokerConfig::default() });
    let (_tx, mut rx) = broker.connect_in_process();
    assert_closed(&mut rx).await;
}

#[tokio::test]
async fn shutdown_closes_every_connection() {
    let broker = Broker::new(BrokerConfig::default());
    let mut a = connect(&broker).await;
    let mut b = connect(&broker).await;
    b.subscribe("prices").await;

    broker.shutdown();
    assert!(broker.is_shut_down());
    assert_closed(&mut a.rx).await;
    assert_closed(&mut b.rx).await;
    wait_for_clients(&broker, 0).await;
    assert!(broker.state().topics.read().await.is_empty());

    let (_tx, mut rx) = broker.connect_in_process();
    assert_closed(&mut rx).await;
}

#[tokio::test]
async fn brokers_are_independent() {
    let first = Broker::new(BrokerConfig::default());
    let second = Broker::new(BrokerConfig::default());
    let mut b = connect(&first).await;
    assert_eq!(b.register("echo").await, None);

    let mut c = connect(&second).await;
    assert_eq!(c.register("echo").await, None);
    assert_eq!(first.client_count().await, 1);
    assert_eq!(second.client_count().await, 1);
}

// =============================================================================
// MALFORMED INPUT
// =============================================================================

/// Connection that replays a fixed inbound script and records what it sent.
struct ScriptedConnection {
    inbound: VecDeque<Result<Message, TransportError>>,
    sent: Arc<StdMutex<Vec<Message>>>,
    closed: Arc<StdMutex<bool>>,
}

#[async_trait::async_trait]
impl ClientConnection for ScriptedConnection {
    async fn send(&mut self, message: Message) -> Result<(), TransportError> {
        self.sent.lock().expect("sent lock").push(message);
        Ok(())
    }

    async fn receive(&mut self) -> Result<Message, TransportError> {
        match self.inbound.pop_front() {
            Some(next) => next,
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) {
        *self.closed.lock().expect("closed lock") = true;
    }
}

#[tokio::test]
async fn malformed_message_closes_only_that_connection() {
    let broker = Broker::new(BrokerConfig::default());
    let mut healthy = connect(&broker).await;
    healthy.subscribe("prices").await;

    let sent = Arc::new(StdMutex::new(Vec::new()));
    let closed = Arc::new(StdMutex::new(false));
    let conn = ScriptedConnection {
        inbound: VecDeque::from([
            Ok(Message::Connect { access_token: None }),
            Ok(Message::Subscribe { topic: topic("prices") }),
            Err(TransportError::Protocol(CodecError::UnknownType("Bogus".into()))),
            Ok(publish_msg("prices", "never routed", MessageScope::Default)),
        ]),
        sent: sent.clone(),
        closed: closed.clone(),
    };

    timeout(Duration::from_millis(500), broker.serve_connection(conn))
        .await
        .expect("worker should exit on protocol violation");

    assert!(*closed.lock().unwrap());
    let sent = sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert!(matches!(sent[0], Message::ConnectResponse { client_id: Some(_), .. }));

    healthy.assert_silent().await;
    assert_eq!(broker.client_count().await, 1);
    assert_eq!(broker.state().topics.read().await.get(&topic("prices")).map(HashSet::len), Some(1));
}

use super::*;
use serde_json::json;

fn topic(name: &str) -> Topic {
    Topic::parse(name).expect("valid topic")
}

#[test]
fn publish_encodes_camel_case_and_omits_defaults() {
    let msg = Message::Publish {
        topic: topic("prices"),
        payload: Some(Buffer::from("AAPL=190")),
        scope: MessageScope::Default,
        correlation_id: None,
    };
    let value: serde_json::Value = serde_json::from_str(&encode_json(&msg).expect("encode")).expect("json");
    assert_eq!(value, json!({"type": "Publish", "topic": "prices", "payload": "QUFQTD0xOTA="}));
}

#[test]
fn update_uses_topic_discriminator() {
    let msg = Message::Update {
        topic: topic("prices"),
        payload: None,
        scope: MessageScope::client("b"),
        source_id: "a".into(),
        correlation_id: Some("c-1".into()),
    };
    let value = serde_json::to_value(&msg).expect("serialize");
    assert_eq!(
        value,
        json!({"type": "Topic", "topic": "prices", "scope": "@b", "sourceId": "a", "correlationId": "c-1"})
    );
    assert_eq!(msg.kind(), "Topic");
}

#[test]
fn invoke_round_trips_through_json() {
    let msg = Message::Invoke {
        request_id: "r1".into(),
        endpoint: "echo".into(),
        payload: Some(Buffer::from(vec![0, 159, 146, 150])),
        scope: MessageScope::Default,
        source_id: Some("caller".into()),
        correlation_id: None,
    };
    let text = encode_json(&msg).expect("encode");
    assert_eq!(decode_json(&text).expect("decode"), msg);
    assert_eq!(msg.request_id(), Some("r1"));
}

#[test]
fn decode_rejects_unknown_type() {
    let err = decode_json(r#"{"type":"Teleport","topic":"x"}"#).expect_err("unknown type");
    assert!(matches!(err, CodecError::Json(_)));
}

#[test]
fn decode_rejects_missing_type() {
    assert!(decode_json(r#"{"topic":"x"}"#).is_err());
}

#[test]
fn decode_requires_request_id_on_invoke_and_response() {
    assert!(decode_json(r#"{"type":"Invoke","endpoint":"echo"}"#).is_err());
    assert!(decode_json(r#"{"type":"InvokeResponse"}"#).is_err());
}

#[test]
fn decode_ignores_request_id_on_variants_without_one() {
    let msg = decode_json(r#"{"type":"Subscribe","topic":"t","requestId":"ignored"}"#).expect("decode");
    assert_eq!(msg, Message::Subscribe { topic: topic("t") });
    assert_eq!(msg.request_id(), None);
}

#[test]
fn decode_rejects_malformed_scope() {
    assert!(decode_json(r#"{"type":"Publish","topic":"t","scope":"nobody"}"#).is_err());
}

#[test]
fn decode_accepts_null_scope_as_default() {
    let msg = decode_json(r#"{"type":"Publish","topic":"t","scope":null}"#).expect("decode");
    assert!(matches!(msg, Message::Publish { scope: MessageScope::Default, .. }));
}

#[test]
fn connect_response_carries_error_payload() {
    let msg = decode_json(r#"{"type":"ConnectResponse","error":{"type":"E_UNAUTHORIZED","message":"bad token"}}"#)
        .expect("decode");
    let Message::ConnectResponse { client_id, error } = msg else {
        panic!("expected ConnectResponse");
    };
    assert_eq!(client_id, None);
    assert_eq!(error.map(|e| e.kind), Some("E_UNAUTHORIZED".to_owned()));
}

#[test]
fn invoke_helpers_build_responses() {
    let ok = Message::invoke_ok("r1", Some(Buffer::from("hi")));
    assert!(matches!(ok, Message::InvokeResponse { error: None, .. }));
    let err = Message::invoke_err("r1", ErrorInfo::new("E_UNKNOWN_SERVICE", "nope"));
    assert_eq!(err.request_id(), Some("r1"));
    assert!(matches!(err, Message::InvokeResponse { payload: None, error: Some(_), .. }));
}

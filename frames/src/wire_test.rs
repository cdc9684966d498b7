use super::*;
use prost::Message as _;

fn sample_invoke() -> Message {
    Message::Invoke {
        request_id: "r-7".into(),
        endpoint: "echo".into(),
        payload: Some(Buffer::from(vec![0, 0, 0xc3, 0xa9, 0xff])),
        scope: MessageScope::client("svc"),
        source_id: Some("caller".into()),
        correlation_id: Some("corr".into()),
    }
}

#[test]
fn encode_decode_preserves_invoke() {
    let msg = sample_invoke();
    let decoded = decode_wire(&encode_wire(&msg)).expect("decode should succeed");
    assert_eq!(decoded, msg);
}

#[test]
fn encode_decode_preserves_error_responses() {
    let msg = Message::RegisterServiceResponse {
        request_id: Some("reg-1".into()),
        error: Some(ErrorInfo::new("E_DUPLICATE_SERVICE_NAME", "echo")),
    };
    assert_eq!(decode_wire(&encode_wire(&msg)).expect("decode"), msg);
}

#[test]
fn empty_payload_is_distinct_from_absent_payload() {
    let with_empty = Message::InvokeResponse { request_id: "r".into(), payload: Some(Buffer::default()), error: None };
    let without = Message::InvokeResponse { request_id: "r".into(), payload: None, error: None };
    assert_eq!(decode_wire(&encode_wire(&with_empty)).expect("decode"), with_empty);
    assert_eq!(decode_wire(&encode_wire(&without)).expect("decode"), without);
}

#[test]
fn decode_rejects_malformed_bytes() {
    let err = decode_wire(&[0xff, 0x00, 0x01]).expect_err("bytes should fail");
    assert!(matches!(err, CodecError::Decode(_)));
}

#[test]
fn decode_rejects_unknown_type() {
    let wire = WireMessage { kind: "Teleport".into(), ..WireMessage::default() };
    let mut bytes = Vec::new();
    wire.encode(&mut bytes).expect("encode");
    let err = decode_wire(&bytes).expect_err("unknown type");
    assert!(matches!(err, CodecError::UnknownType(kind) if kind == "Teleport"));
}

#[test]
fn decode_rejects_invoke_without_request_id() {
    let wire = WireMessage { kind: "Invoke".into(), endpoint: Some("echo".into()), ..WireMessage::default() };
    let mut bytes = Vec::new();
    wire.encode(&mut bytes).expect("encode");
    let err = decode_wire(&bytes).expect_err("missing request id");
    assert!(matches!(err, CodecError::MissingField { kind: "Invoke", field: "requestId" }));
}

#[test]
fn decode_rejects_malformed_scope() {
    let wire = WireMessage {
        kind: "Publish".into(),
        topic: Some("t".into()),
        scope: Some("broadcast".into()),
        ..WireMessage::default()
    };
    let mut bytes = Vec::new();
    wire.encode(&mut bytes).expect("encode");
    assert!(matches!(decode_wire(&bytes), Err(CodecError::InvalidField(_))));
}

#[test]
fn decode_keeps_invalid_topic_for_broker_to_reject() {
    let wire = WireMessage { kind: "Subscribe".into(), topic: Some(String::new()), ..WireMessage::default() };
    let mut bytes = Vec::new();
    wire.encode(&mut bytes).expect("encode");
    let Message::Subscribe { topic } = decode_wire(&bytes).expect("decode") else {
        panic!("expected Subscribe");
    };
    assert!(!topic.is_valid());
}

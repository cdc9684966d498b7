use super::*;

#[test]
fn topic_parse_accepts_plain_names() {
    let topic = Topic::parse("prices").expect("valid topic");
    assert_eq!(topic.as_str(), "prices");
    assert!(topic.is_valid());
}

#[test]
fn topic_parse_rejects_empty_blank_and_control_chars() {
    assert_eq!(Topic::parse(""), Err(IdentifierError::Topic(String::new())));
    assert!(Topic::parse("   ").is_err());
    assert!(Topic::parse("a\nb").is_err());
}

#[test]
fn topic_has_no_hierarchy() {
    let topic = Topic::parse("a/b/*").expect("slashes are plain characters");
    assert_eq!(topic.to_string(), "a/b/*");
}

#[test]
fn endpoint_validation_matches_topic_rules() {
    assert!(validate_endpoint("echo").is_ok());
    assert!(validate_endpoint("").is_err());
    assert!(validate_endpoint("\t").is_err());
}

#[test]
fn scope_parse_handles_default_and_client_forms() {
    assert_eq!(MessageScope::parse("").expect("empty"), MessageScope::Default);
    assert_eq!(MessageScope::parse("@abc").expect("client"), MessageScope::client("abc"));
    assert!(MessageScope::parse("@").is_err());
    assert!(MessageScope::parse("abc").is_err());
}

#[test]
fn scope_equality_is_value_equality() {
    assert_eq!(MessageScope::client("x"), MessageScope::parse("@x").expect("client"));
    assert_ne!(MessageScope::client("x"), MessageScope::client("y"));
    assert_eq!(MessageScope::client("x").encode().as_deref(), Some("@x"));
    assert_eq!(MessageScope::Default.encode(), None);
}

#[test]
fn scope_deserializes_null_as_default() {
    let scope: MessageScope = serde_json::from_str("null").expect("null scope");
    assert!(scope.is_default());
    let scope: MessageScope = serde_json::from_str("\"@c1\"").expect("client scope");
    assert_eq!(scope.client_id(), Some("c1"));
}

#[test]
fn buffer_base64_is_exact_for_arbitrary_bytes() {
    let bytes = vec![0_u8, 1, 0, 255, 0xe2, 0x82, 0xac, 0];
    let buffer = Buffer::from(bytes.clone());
    let json = serde_json::to_string(&buffer).expect("serialize");
    let back: Buffer = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(back.as_bytes(), bytes.as_slice());
}

#[test]
fn buffer_rejects_invalid_base64() {
    let err = serde_json::from_str::<Buffer>("\"not base64!\"");
    assert!(err.is_err());
}

#[test]
fn buffer_debug_shows_text_or_length() {
    assert_eq!(format!("{:?}", Buffer::from("hi")), "Buffer(\"hi\")");
    assert_eq!(format!("{:?}", Buffer::from(vec![0xff, 0xfe])), "Buffer(2 bytes)");
}

#[test]
fn error_info_serializes_kind_as_type() {
    let info = ErrorInfo::new("E_UNKNOWN_SERVICE", "unknown service: echo");
    let json = serde_json::to_value(&info).expect("serialize");
    assert_eq!(json, serde_json::json!({"type": "E_UNKNOWN_SERVICE", "message": "unknown service: echo"}));
    assert_eq!(info.to_string(), "E_UNKNOWN_SERVICE: unknown service: echo");
}

#[test]
fn error_info_message_is_optional() {
    let info: ErrorInfo = serde_json::from_str(r#"{"type":"E_PROTOCOL"}"#).expect("deserialize");
    assert_eq!(info.message, None);
    assert_eq!(info.to_string(), "E_PROTOCOL");
}

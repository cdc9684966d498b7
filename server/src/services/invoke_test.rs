use super::*;
use crate::state::test_helpers::{seed_client, test_state};
use frames::ErrorCode;

fn request(request_id: &str, endpoint: &str, scope: MessageScope) -> InvokeRequest {
    InvokeRequest {
        request_id: request_id.into(),
        endpoint: endpoint.into(),
        payload: Some(Buffer::from("hi")),
        scope,
        correlation_id: None,
    }
}

async fn register_owner(state: &BrokerState, endpoint: &str, owner: &str) {
    state.services.write().await.insert(endpoint.into(), owner.into());
}

#[tokio::test]
async fn invoke_forwards_with_fresh_request_id() {
    let state = test_state();
    let mut owner_rx = seed_client(&state, "b").await;
    register_owner(&state, "echo", "b").await;

    invoke(&state, "a", request("r1", "echo", MessageScope::Default)).await.unwrap();
    let Some(Message::Invoke { request_id, source_id, .. }) = owner_rx.recv().await else {
        panic!("expected forwarded Invoke");
    };
    assert_ne!(request_id, "r1");
    assert_eq!(source_id.as_deref(), Some("a"));
    assert_eq!(state.invocations.lock().await.len(), 1);
}

#[tokio::test]
async fn invoke_reports_missing_owner_connection_as_unavailable() {
    let state = test_state();
    register_owner(&state, "echo", "gone").await;

    let err = invoke(&state, "a", request("r1", "echo", MessageScope::Default)).await.unwrap_err();
    assert_eq!(err, InvokeError::ServiceUnavailable("echo".into()));
    assert!(err.retryable());
    assert!(state.invocations.lock().await.is_empty());
}

#[tokio::test]
async fn invoke_error_codes() {
    let state = test_state();
    let err = invoke(&state, "a", request("r1", "echo", MessageScope::Default)).await.unwrap_err();
    assert_eq!(err.error_code(), frames::codes::UNKNOWN_SERVICE);

    let err = invoke(&state, "a", request("r1", "echo", MessageScope::client("x"))).await.unwrap_err();
    assert_eq!(err.error_code(), frames::codes::UNKNOWN_CLIENT);

    let err = invoke(&state, "a", request("r1", "\n", MessageScope::Default)).await.unwrap_err();
    assert_eq!(err.error_code(), frames::codes::INVALID_ENDPOINT);
}

#[tokio::test]
async fn respond_routes_to_caller_once() {
    let state = test_state();
    let mut caller_rx = seed_client(&state, "a").await;
    let mut owner_rx = seed_client(&state, "b").await;
    register_owner(&state, "echo", "b").await;

    invoke(&state, "a", request("r1", "echo", MessageScope::Default)).await.unwrap();
    let Some(Message::Invoke { request_id, .. }) = owner_rx.recv().await else {
        panic!("expected forwarded Invoke");
    };

    assert!(!respond(&state, "a", &request_id, None, None).await);
    assert!(respond(&state, "b", &request_id, Some(Buffer::from("hi")), None).await);
    assert!(!respond(&state, "b", &request_id, None, None).await);

    assert_eq!(caller_rx.recv().await, Some(Message::invoke_ok("r1", Some(Buffer::from("hi")))));
}

#[tokio::test]
async fn fail_orphan_sends_service_unavailable() {
    let state = test_state();
    let mut caller_rx = seed_client(&state, "a").await;
    let orphan = crate::state::test_helpers::invocation("a", "r9", "b", "s9");

    fail_orphan(&state, orphan).await;
    match caller_rx.recv().await {
        Some(Message::InvokeResponse { request_id, error: Some(error), .. }) => {
            assert_eq!(request_id, "r9");
            assert_eq!(error.kind, frames::codes::SERVICE_UNAVAILABLE);
        }
        other => panic!("expected error response, got {other:?}"),
    }
}

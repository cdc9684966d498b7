//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! The broker is reachable over a single WebSocket endpoint. `/healthz`
//! exists for process supervisors.

pub mod ws;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use tower_http::trace::TraceLayer;

use crate::broker::Broker;

pub fn app(broker: Broker) -> Router {
    Router::new()
        .route("/ws", get(ws::handle_ws))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(broker)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

//! Message broker runtime.
//!
//! ARCHITECTURE
//! ============
//! - `broker`: connection workers, handshake, dispatch
//! - `services`: subscription, registry, and invocation routing
//! - `state`: shared tables, one lock each
//! - `transport`: the `ClientConnection` seam and its in-process implementation
//! - `routes`: Axum router with the WebSocket implementation
//! - `auth`, `config`: handshake token checks and env configuration

pub mod auth;
pub mod broker;
pub mod config;
pub mod routes;
pub mod services;
pub mod state;
pub mod transport;

pub use broker::Broker;
pub use config::BrokerConfig;

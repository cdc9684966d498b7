//! Client runtime for the message broker.
//!
//! A [`Client`] owns one [`Connection`] to a broker and exposes the
//! application-facing operations: topic subscriptions, publishing, service
//! registration and request/response invocation.
//!
//! ARCHITECTURE
//! ============
//! - `transport`: the `Connection` trait plus channel and WebSocket implementations
//! - `client`: lifecycle, IO task, routing of inbound messages
//! - `pending`: outstanding request table keyed by request id
//! - `subscription`: per-subscriber queues and the handle returned by `subscribe`
//! - `service`: handler trait for registered services and local endpoints
//!
//! ```text
//! Client API ──► outbound queue ──► IO task ──► Connection ──► broker
//!      ▲                              │
//!      └──── pending / subscribers ◄──┘
//! ```

mod client;
pub mod config;
mod error;
mod pending;
pub mod service;
pub mod subscription;
pub mod transport;

pub use client::{Client, ClientState, InvokeOptions, PublishOptions};
pub use config::ClientOptions;
pub use error::ClientError;
pub use service::{HandlerError, ServiceHandler, ServiceRequest, service_fn};
pub use subscription::{Subscription, TopicHandler, TopicMessage, handler_fn};
pub use transport::{ChannelConnection, Connection, Encoding, TransportError, WsConnection};

pub use frames::{Buffer, MessageScope, Topic};

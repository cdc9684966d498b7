//! Server side of the transport abstraction.
//!
//! DESIGN
//! ======
//! The broker talks to each peer through a [`ClientConnection`]: whole
//! messages in, whole messages out, per-connection FIFO. Socket framing lives
//! in the implementations (`routes::ws` for WebSocket, [`ChannelClientConnection`]
//! for peers hosted in the same process).

use frames::{CodecError, Message};
use tokio::sync::mpsc;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The peer went away or the connection was closed locally.
    #[error("connection closed")]
    Closed,
    /// The peer sent something that is not a valid message.
    #[error("protocol violation: {0}")]
    Protocol(#[from] CodecError),
    #[error("socket error: {0}")]
    Socket(String),
}

/// One accepted peer, owned exclusively by its connection worker.
///
/// `receive` must be cancel-safe: the worker races it against outbound
/// traffic in a `select!` loop.
#[async_trait::async_trait]
pub trait ClientConnection: Send {
    async fn send(&mut self, message: Message) -> Result<(), TransportError>;

    async fn receive(&mut self) -> Result<Message, TransportError>;

    /// Idempotent. A later `receive` returns [`TransportError::Closed`].
    async fn close(&mut self);
}

/// In-process connection backed by a pair of unbounded channels.
pub struct ChannelClientConnection {
    inbound: mpsc::UnboundedReceiver<Message>,
    outbound: Option<mpsc::UnboundedSender<Message>>,
}

impl ChannelClientConnection {
    #[must_use]
    pub fn new(inbound: mpsc::UnboundedReceiver<Message>, outbound: mpsc::UnboundedSender<Message>) -> Self {
        Self { inbound, outbound: Some(outbound) }
    }
}

#[async_trait::async_trait]
impl ClientConnection for ChannelClientConnection {
    async fn send(&mut self, message: Message) -> Result<(), TransportError> {
        let Some(outbound) = &self.outbound else {
            return Err(TransportError::Closed);
        };
        outbound.send(message).map_err(|_| TransportError::Closed)
    }

    async fn receive(&mut self) -> Result<Message, TransportError> {
        if self.outbound.is_none() {
            return Err(TransportError::Closed);
        }
        self.inbound.recv().await.ok_or(TransportError::Closed)
    }

    async fn close(&mut self) {
        // Dropping the sender is what the peer observes as end of stream.
        self.outbound = None;
        self.inbound.close();
    }
}

#[cfg(test)]
#[path = "transport_test.rs"]
mod tests;

//! Client side of the transport abstraction.
//!
//! DESIGN
//! ======
//! A [`Connection`] moves whole messages between one client and the broker,
//! in order. The client's IO task owns it after the handshake and races
//! `receive` against outbound traffic, so `receive` must be cancel-safe.
//!
//! - [`ChannelConnection`]: in-process, pairs with the broker's
//!   `connect_in_process` ends
//! - [`WsConnection`]: WebSocket via tokio-tungstenite, JSON text or
//!   protobuf binary frames

use frames::{CodecError, Message};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Closed locally, or the broker went away.
    #[error("connection closed")]
    Closed,
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("protocol violation: {0}")]
    Protocol(#[from] CodecError),
    #[error("socket error: {0}")]
    Socket(String),
}

#[async_trait::async_trait]
pub trait Connection: Send {
    /// Establish the underlying transport. Called once, before any `send`.
    async fn connect(&mut self) -> Result<(), TransportError>;

    async fn send(&mut self, message: Message) -> Result<(), TransportError>;

    /// Next inbound message. Cancel-safe.
    async fn receive(&mut self) -> Result<Message, TransportError>;

    /// Idempotent. A later `receive` returns [`TransportError::Closed`].
    async fn close(&mut self);
}

// =============================================================================
// CHANNEL
// =============================================================================

/// In-process connection over a pair of unbounded channels.
pub struct ChannelConnection {
    outbound: Option<mpsc::UnboundedSender<Message>>,
    inbound: mpsc::UnboundedReceiver<Message>,
}

impl ChannelConnection {
    /// `outbound` carries messages to the broker, `inbound` carries its replies.
    #[must_use]
    pub fn new(outbound: mpsc::UnboundedSender<Message>, inbound: mpsc::UnboundedReceiver<Message>) -> Self {
        Self { outbound: Some(outbound), inbound }
    }
}

#[async_trait::async_trait]
impl Connection for ChannelConnection {
    async fn connect(&mut self) -> Result<(), TransportError> {
        match &self.outbound {
            Some(tx) if !tx.is_closed() => Ok(()),
            _ => Err(TransportError::Closed),
        }
    }

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
        self.outbound = None;
        self.inbound.close();
    }
}

// =============================================================================
// WEBSOCKET
// =============================================================================

/// Frame encoding used by [`WsConnection`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Encoding {
    /// JSON in text frames.
    #[default]
    Json,
    /// Protobuf in binary frames.
    Protobuf,
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct WsConnection {
    url: String,
    encoding: Encoding,
    stream: Option<WsStream>,
}

impl WsConnection {
    #[must_use]
    pub fn new(url: impl Into<String>, encoding: Encoding) -> Self {
        Self { url: url.into(), encoding, stream: None }
    }

    fn stream(&mut self) -> Result<&mut WsStream, TransportError> {
        self.stream.as_mut().ok_or(TransportError::Closed)
    }
}

#[async_trait::async_trait]
impl Connection for WsConnection {
    async fn connect(&mut self) -> Result<(), TransportError> {
        let (stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| TransportError::Connect(format!("{}: {e}", self.url)))?;
        self.stream = Some(stream);
        Ok(())
    }

    async fn send(&mut self, message: Message) -> Result<(), TransportError> {
        let frame = match self.encoding {
            Encoding::Json => WsMessage::Text(frames::encode_json(&message)?.into()),
            Encoding::Protobuf => WsMessage::Binary(frames::encode_wire(&message).into()),
        };
        self.stream()?.send(frame).await.map_err(|e| TransportError::Socket(e.to_string()))
    }

    async fn receive(&mut self) -> Result<Message, TransportError> {
        loop {
            let Some(frame) = self.stream()?.next().await else {
                return Err(TransportError::Closed);
            };
            match frame.map_err(|e| TransportError::Socket(e.to_string()))? {
                WsMessage::Text(text) => return Ok(frames::decode_json(text.as_str())?),
                WsMessage::Binary(bytes) => return Ok(frames::decode_wire(&bytes)?),
                WsMessage::Close(_) => return Err(TransportError::Closed),
                WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => {}
            }
        }
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.close(None).await;
        }
    }
}

#[cfg(test)]
#[path = "transport_test.rs"]
mod tests;

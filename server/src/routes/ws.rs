//! WebSocket transport for the broker.
//!
//! DESIGN
//! ======
//! On upgrade the socket is wrapped in a [`WsClientConnection`] and handed to
//! the broker, which owns it for the rest of its life. Text frames carry
//! JSON messages, binary frames carry protobuf. Replies use the encoding of
//! the most recent inbound frame, so a peer never has to announce one.

use axum::extract::State;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use frames::Message;

use crate::broker::Broker;
use crate::transport::{ClientConnection, TransportError};

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(State(broker): State<Broker>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| async move {
        broker.serve_connection(WsClientConnection::new(socket)).await;
    })
}

// =============================================================================
// CONNECTION
// =============================================================================

pub struct WsClientConnection {
    socket: WebSocket,
    binary: bool,
    closed: bool,
}

impl WsClientConnection {
    #[must_use]
    pub fn new(socket: WebSocket) -> Self {
        Self { socket, binary: false, closed: false }
    }
}

#[async_trait::async_trait]
impl ClientConnection for WsClientConnection {
    async fn send(&mut self, message: Message) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let frame = if self.binary {
            WsMessage::Binary(frames::encode_wire(&message).into())
        } else {
            WsMessage::Text(frames::encode_json(&message)?.into())
        };
        self.socket.send(frame).await.map_err(|e| TransportError::Socket(e.to_string()))
    }

    async fn receive(&mut self) -> Result<Message, TransportError> {
        loop {
            if self.closed {
                return Err(TransportError::Closed);
            }
            let Some(frame) = self.socket.recv().await else {
                return Err(TransportError::Closed);
            };
            match frame.map_err(|e| TransportError::Socket(e.to_string()))? {
                WsMessage::Text(text) => {
                    self.binary = false;
                    return Ok(frames::decode_json(text.as_str())?);
                }
                WsMessage::Binary(bytes) => {
                    self.binary = true;
                    return Ok(frames::decode_wire(&bytes)?);
                }
                WsMessage::Close(_) => {
                    self.closed = true;
                    return Err(TransportError::Closed);
                }
                WsMessage::Ping(_) | WsMessage::Pong(_) => {}
            }
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self.socket.send(WsMessage::Close(None)).await;
    }
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;

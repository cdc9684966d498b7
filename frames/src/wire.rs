//! Protobuf binary codec.
//!
//! DESIGN
//! ======
//! The wire record is flat: a string discriminator plus one optional field
//! per envelope key. Conversion back into [`Message`] enforces the required
//! fields of each variant, so a record that names `Invoke` without a
//! `request_id` fails the same way a JSON message would.

use prost::Message as _;

use crate::CodecError;
use crate::message::Message;
use crate::types::{Buffer, ErrorInfo, MessageScope, Topic};

/// Encode a message into protobuf bytes.
#[must_use]
pub fn encode_wire(message: &Message) -> Vec<u8> {
    message_to_wire(message).encode_to_vec()
}

/// Decode protobuf bytes into a message.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] for malformed bytes,
/// [`CodecError::UnknownType`] for an unrecognized discriminator,
/// [`CodecError::MissingField`] when a required field is absent, and
/// [`CodecError::InvalidField`] for a malformed scope.
pub fn decode_wire(bytes: &[u8]) -> Result<Message, CodecError> {
    let wire = WireMessage::decode(bytes)?;
    wire_to_message(wire)
}

fn message_to_wire(message: &Message) -> WireMessage {
    let mut wire = WireMessage { kind: message.kind().to_owned(), ..WireMessage::default() };

    match message {
        Message::Connect { access_token } => {
            wire.access_token.clone_from(access_token);
        }
        Message::ConnectResponse { client_id, error } => {
            wire.client_id.clone_from(client_id);
            wire.error = error.as_ref().map(error_to_wire);
        }
        Message::Subscribe { topic } | Message::Unsubscribe { topic } => {
            wire.topic = Some(topic.as_str().to_owned());
        }
        Message::Publish { topic, payload, scope, correlation_id } => {
            wire.topic = Some(topic.as_str().to_owned());
            wire.payload = payload.as_ref().map(|p| p.as_bytes().to_vec());
            wire.scope = scope.encode();
            wire.correlation_id.clone_from(correlation_id);
        }
        Message::Update { topic, payload, scope, source_id, correlation_id } => {
            wire.topic = Some(topic.as_str().to_owned());
            wire.payload = payload.as_ref().map(|p| p.as_bytes().to_vec());
            wire.scope = scope.encode();
            wire.source_id = Some(source_id.clone());
            wire.correlation_id.clone_from(correlation_id);
        }
        Message::RegisterService { request_id, endpoint }
        | Message::UnregisterService { request_id, endpoint } => {
            wire.request_id.clone_from(request_id);
            wire.endpoint = Some(endpoint.clone());
        }
        Message::RegisterServiceResponse { request_id, error }
        | Message::UnregisterServiceResponse { request_id, error } => {
            wire.request_id.clone_from(request_id);
            wire.error = error.as_ref().map(error_to_wire);
        }
        Message::Invoke { request_id, endpoint, payload, scope, source_id, correlation_id } => {
            wire.request_id = Some(request_id.clone());
            wire.endpoint = Some(endpoint.clone());
            wire.payload = payload.as_ref().map(|p| p.as_bytes().to_vec());
            wire.scope = scope.encode();
            wire.source_id.clone_from(source_id);
            wire.correlation_id.clone_from(correlation_id);
        }
        Message::InvokeResponse { request_id, payload, error } => {
            wire.request_id = Some(request_id.clone());
            wire.payload = payload.as_ref().map(|p| p.as_bytes().to_vec());
            wire.error = error.as_ref().map(error_to_wire);
        }
    }

    wire
}

fn wire_to_message(wire: WireMessage) -> Result<Message, CodecError> {
    let WireMessage {
        kind,
        request_id,
        topic,
        endpoint,
        payload,
        scope,
        source_id,
        correlation_id,
        client_id,
        access_token,
        error,
    } = wire;

    let payload = payload.map(Buffer::from);
    let error = error.map(wire_to_error);
    let scope = match scope {
        Some(raw) => MessageScope::parse(&raw).map_err(|e| CodecError::InvalidField(e.to_string()))?,
        None => MessageScope::Default,
    };

    let message = match kind.as_str() {
        "Connect" => Message::Connect { access_token },
        "ConnectResponse" => Message::ConnectResponse { client_id, error },
        "Subscribe" => Message::Subscribe { topic: required_topic("Subscribe", topic)? },
        "Unsubscribe" => Message::Unsubscribe { topic: required_topic("Unsubscribe", topic)? },
        "Publish" => Message::Publish {
            topic: required_topic("Publish", topic)?,
            payload,
            scope,
            correlation_id,
        },
        "Topic" => Message::Update {
            topic: required_topic("Topic", topic)?,
            payload,
            scope,
            source_id: required("Topic", "sourceId", source_id)?,
            correlation_id,
        },
        "RegisterService" => Message::RegisterService {
            request_id,
            endpoint: required("RegisterService", "endpoint", endpoint)?,
        },
        "RegisterServiceResponse" => Message::RegisterServiceResponse { request_id, error },
        "UnregisterService" => Message::UnregisterService {
            request_id,
            endpoint: required("UnregisterService", "endpoint", endpoint)?,
        },
        "UnregisterServiceResponse" => Message::UnregisterServiceResponse { request_id, error },
        "Invoke" => Message::Invoke {
            request_id: required("Invoke", "requestId", request_id)?,
            endpoint: required("Invoke", "endpoint", endpoint)?,
            payload,
            scope,
            source_id,
            correlation_id,
        },
        "InvokeResponse" => Message::InvokeResponse {
            request_id: required("InvokeResponse", "requestId", request_id)?,
            payload,
            error,
        },
        _ => return Err(CodecError::UnknownType(kind)),
    };

    Ok(message)
}

fn required(kind: &'static str, field: &'static str, value: Option<String>) -> Result<String, CodecError> {
    value.ok_or(CodecError::MissingField { kind, field })
}

fn required_topic(kind: &'static str, value: Option<String>) -> Result<Topic, CodecError> {
    // Validity is the broker's call; the codec only insists the field exists.
    required(kind, "topic", value).map(Topic::unchecked)
}

fn error_to_wire(error: &ErrorInfo) -> WireError {
    WireError { kind: error.kind.clone(), message: error.message.clone() }
}

fn wire_to_error(error: WireError) -> ErrorInfo {
    ErrorInfo { kind: error.kind, message: error.message }
}

#[derive(Clone, PartialEq, prost::Message)]
struct WireMessage {
    #[prost(string, tag = "1")]
    kind: String,
    #[prost(string, optional, tag = "2")]
    request_id: Option<String>,
    #[prost(string, optional, tag = "3")]
    topic: Option<String>,
    #[prost(string, optional, tag = "4")]
    endpoint: Option<String>,
    #[prost(bytes = "vec", optional, tag = "5")]
    payload: Option<Vec<u8>>,
    #[prost(string, optional, tag = "6")]
    scope: Option<String>,
    #[prost(string, optional, tag = "7")]
    source_id: Option<String>,
    #[prost(string, optional, tag = "8")]
    correlation_id: Option<String>,
    #[prost(string, optional, tag = "9")]
    client_id: Option<String>,
    #[prost(string, optional, tag = "10")]
    access_token: Option<String>,
    #[prost(message, optional, tag = "11")]
    error: Option<WireError>,
}

#[derive(Clone, PartialEq, prost::Message)]
struct WireError {
    #[prost(string, tag = "1")]
    kind: String,
    #[prost(string, optional, tag = "2")]
    message: Option<String>,
}

#[cfg(test)]
#[path = "wire_test.rs"]
mod tests;

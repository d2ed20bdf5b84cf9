//! Message envelope and the message type vocabulary.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{GraphQLError, ProtocolError};
use crate::payload::{DataPayload, StartPayload};

/// The fixed set of graphql-ws message types.
///
/// Unrecognized type strings are kept as [`MessageType::Unknown`] so the
/// connection can log them instead of failing to decode the frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageType {
    // ── Client → Server ─────────────────────────────────────────────────
    ConnectionInit,
    /// Legacy alias of `connection_init` that never triggers an ack.
    ConnectionAuth,
    Start,
    Stop,
    ConnectionTerminate,

    // ── Server → Client ─────────────────────────────────────────────────
    ConnectionAck,
    ConnectionError,
    KeepAlive,
    Data,
    Error,
    Complete,

    /// Anything outside the vocabulary, with the raw type string.
    Unknown(String),
}

impl MessageType {
    pub const CONNECTION_INIT: &str = "connection_init";
    pub const CONNECTION_AUTH: &str = "connection_auth";
    pub const START: &str = "start";
    pub const STOP: &str = "stop";
    pub const CONNECTION_TERMINATE: &str = "connection_terminate";
    pub const CONNECTION_ACK: &str = "connection_ack";
    pub const CONNECTION_ERROR: &str = "connection_error";
    pub const KEEP_ALIVE: &str = "ka";
    pub const DATA: &str = "data";
    pub const ERROR: &str = "error";
    pub const COMPLETE: &str = "complete";

    pub fn as_str(&self) -> &str {
        match self {
            Self::ConnectionInit => Self::CONNECTION_INIT,
            Self::ConnectionAuth => Self::CONNECTION_AUTH,
            Self::Start => Self::START,
            Self::Stop => Self::STOP,
            Self::ConnectionTerminate => Self::CONNECTION_TERMINATE,
            Self::ConnectionAck => Self::CONNECTION_ACK,
            Self::ConnectionError => Self::CONNECTION_ERROR,
            Self::KeepAlive => Self::KEEP_ALIVE,
            Self::Data => Self::DATA,
            Self::Error => Self::ERROR,
            Self::Complete => Self::COMPLETE,
            Self::Unknown(raw) => raw,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }
}

impl From<&str> for MessageType {
    fn from(raw: &str) -> Self {
        match raw {
            Self::CONNECTION_INIT => Self::ConnectionInit,
            Self::CONNECTION_AUTH => Self::ConnectionAuth,
            Self::START => Self::Start,
            Self::STOP => Self::Stop,
            Self::CONNECTION_TERMINATE => Self::ConnectionTerminate,
            Self::CONNECTION_ACK => Self::ConnectionAck,
            Self::CONNECTION_ERROR => Self::ConnectionError,
            Self::KEEP_ALIVE => Self::KeepAlive,
            Self::DATA => Self::Data,
            Self::ERROR => Self::Error,
            Self::COMPLETE => Self::Complete,
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl From<String> for MessageType {
    fn from(raw: String) -> Self {
        match Self::from(raw.as_str()) {
            Self::Unknown(_) => Self::Unknown(raw),
            known => known,
        }
    }
}

impl From<MessageType> for String {
    fn from(kind: MessageType) -> Self {
        match kind {
            MessageType::Unknown(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single graphql-ws frame: `{ id, type, payload }`.
///
/// `id` is absent for connection-scoped messages. `payload` stays opaque
/// JSON until the connection dispatches on `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationMessage {
    #[serde(
        default,
        deserialize_with = "deserialize_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

/// Clients occasionally send numeric ids; normalize them to strings.
fn deserialize_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        String(String),
        Number(serde_json::Number),
    }

    Ok(Option::<RawId>::deserialize(deserializer)?.map(|raw| match raw {
        RawId::String(s) => s,
        RawId::Number(n) => n.to_string(),
    }))
}

// ─────────────────────────────────────────────────────────────────────────────
// Constructors
// ─────────────────────────────────────────────────────────────────────────────

impl OperationMessage {
    pub fn new(kind: MessageType) -> Self {
        Self {
            id: None,
            kind,
            payload: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn connection_ack() -> Self {
        Self::new(MessageType::ConnectionAck)
    }

    pub fn connection_error(reason: impl Into<String>) -> Self {
        Self::new(MessageType::ConnectionError).with_payload(Value::String(reason.into()))
    }

    pub fn keep_alive() -> Self {
        Self::new(MessageType::KeepAlive)
    }

    pub fn data(id: impl Into<String>, payload: &DataPayload) -> Self {
        Self {
            id: Some(id.into()),
            kind: MessageType::Data,
            payload: serde_json::to_value(payload).ok(),
        }
    }

    /// An `error` frame. Operation-scoped when `id` is set.
    pub fn error(id: Option<String>, errors: &[GraphQLError]) -> Self {
        Self {
            id,
            kind: MessageType::Error,
            payload: serde_json::to_value(errors).ok(),
        }
    }

    pub fn complete(id: impl Into<String>) -> Self {
        Self::new(MessageType::Complete).with_id(id)
    }

    pub fn connection_init(payload: Option<Value>) -> Self {
        Self {
            id: None,
            kind: MessageType::ConnectionInit,
            payload,
        }
    }

    pub fn start(id: impl Into<String>, payload: &StartPayload) -> Self {
        Self {
            id: Some(id.into()),
            kind: MessageType::Start,
            payload: serde_json::to_value(payload).ok(),
        }
    }

    pub fn stop(id: impl Into<String>) -> Self {
        Self::new(MessageType::Stop).with_id(id)
    }

    pub fn connection_terminate() -> Self {
        Self::new(MessageType::ConnectionTerminate)
    }

    /// The operation id, or `""` for connection-scoped messages.
    pub fn id(&self) -> &str {
        self.id.as_deref().unwrap_or_default()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Codec
// ─────────────────────────────────────────────────────────────────────────────

impl OperationMessage {
    /// Decode a text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Decode a binary frame carrying UTF-8 JSON.
    pub fn decode_slice(bytes: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Encode as a text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

impl fmt::Display for OperationMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.encode() {
            Ok(json) => f.write_str(&json),
            Err(_) => f.write_str("<invalid>"),
        }
    }
}

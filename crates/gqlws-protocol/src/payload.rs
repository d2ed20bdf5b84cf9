//! Payload types carried inside [`OperationMessage`](crate::OperationMessage).

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::{GraphQLError, ProtocolError};
use crate::message::MessageType;

// ─────────────────────────────────────────────────────────────────────────────
// Client → Server
// ─────────────────────────────────────────────────────────────────────────────

/// Free-form `connection_init` / `connection_auth` payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InitPayload(pub Map<String, Value>);

impl InitPayload {
    /// Extract the init payload of a message of type `kind`.
    ///
    /// A missing or `null` payload is an empty object. A JSON-encoded string
    /// is decoded. Anything else that is not an object is rejected.
    pub fn from_message(kind: MessageType, payload: Option<&Value>) -> Result<Self, ProtocolError> {
        match payload {
            None | Some(Value::Null) => Ok(Self::default()),
            Some(Value::Object(map)) => Ok(Self(map.clone())),
            Some(Value::String(encoded)) => serde_json::from_str::<Map<String, Value>>(encoded)
                .map(Self)
                .map_err(|e| ProtocolError::invalid_payload(kind, e)),
            Some(_) => Err(ProtocolError::invalid_payload(kind, "expected a JSON object")),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// The bearer token, from `authToken` or `Authorization`.
    pub fn auth_token(&self) -> Option<&str> {
        self.get("authToken")
            .or_else(|| self.get("Authorization"))
            .and_then(Value::as_str)
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

/// The operation requested by a `start` message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StartPayload {
    pub query: String,
    #[serde(
        default,
        deserialize_with = "lenient_variables",
        skip_serializing_if = "Option::is_none"
    )]
    pub variables: Option<Map<String, Value>>,
    #[serde(rename = "operationName", default, skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl StartPayload {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    pub fn with_variables(mut self, variables: Map<String, Value>) -> Self {
        self.variables = Some(variables);
        self
    }

    pub fn with_operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    /// Extract the start payload of a message.
    ///
    /// Accepts the payload as an object or as a JSON-encoded string.
    pub fn from_message(payload: Option<&Value>) -> Result<Self, ProtocolError> {
        let parsed = match payload {
            None | Some(Value::Null) => {
                return Err(ProtocolError::invalid_payload(MessageType::Start, "payload is missing"));
            }
            Some(Value::String(encoded)) => serde_json::from_str::<Self>(encoded),
            Some(value) => Self::deserialize(value),
        };

        let payload = parsed.map_err(|e| ProtocolError::invalid_payload(MessageType::Start, e))?;
        if payload.query.trim().is_empty() {
            return Err(ProtocolError::invalid_payload(MessageType::Start, "query must not be empty"));
        }
        Ok(payload)
    }
}

/// `variables` may arrive as an object or as a JSON-encoded string.
fn lenient_variables<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Map<String, Value>>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawVariables {
        Map(Map<String, Value>),
        Encoded(String),
    }

    match Option::<RawVariables>::deserialize(deserializer)? {
        None => Ok(None),
        Some(RawVariables::Map(map)) => Ok(Some(map)),
        Some(RawVariables::Encoded(s)) if s.trim().is_empty() => Ok(None),
        Some(RawVariables::Encoded(s)) => serde_json::from_str(&s)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Server → Client
// ─────────────────────────────────────────────────────────────────────────────

/// Result payload of a `data` message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataPayload {
    pub data: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphQLError>,
}

impl DataPayload {
    pub fn new(data: Value, errors: Vec<GraphQLError>) -> Self {
        Self { data, errors }
    }
}

//! GraphQL error shape and protocol-level errors.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::message::MessageType;

/// Errors raised while decoding frames or their payloads.
///
/// None of these are fatal to a connection except [`ProtocolError::FrameTooLarge`],
/// which the transport treats as a broken read stream.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid message: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("invalid {kind} payload: {reason}")]
    InvalidPayload { kind: MessageType, reason: String },

    #[error("{0} message is missing an operation id")]
    MissingId(MessageType),

    #[error("frame of {size} bytes exceeds the {limit} byte read limit")]
    FrameTooLarge { size: usize, limit: usize },
}

impl ProtocolError {
    pub fn invalid_payload(kind: MessageType, reason: impl fmt::Display) -> Self {
        Self::InvalidPayload {
            kind,
            reason: reason.to_string(),
        }
    }
}

/// Source location attached to a GraphQL error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorLocation {
    pub line: u32,
    pub column: u32,
}

/// A GraphQL-shaped error, the only error form that reaches clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphQLError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<ErrorLocation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Map<String, Value>>,
}

impl GraphQLError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            locations: Vec::new(),
            path: None,
            extensions: None,
        }
    }

    pub fn with_location(mut self, line: u32, column: u32) -> Self {
        self.locations.push(ErrorLocation { line, column });
        self
    }

    pub fn with_path(mut self, path: Vec<Value>) -> Self {
        self.path = Some(path);
        self
    }

    pub fn with_extension(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extensions
            .get_or_insert_with(Map::new)
            .insert(key.into(), value);
        self
    }
}

impl fmt::Display for GraphQLError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for GraphQLError {}

impl From<ProtocolError> for GraphQLError {
    fn from(err: ProtocolError) -> Self {
        Self::new(err.to_string())
    }
}

//! graphql-ws - Protocol Types
//!
//! Wire types for the `graphql-ws` WebSocket sub-protocol: one long-lived
//! socket multiplexing many GraphQL operations, each tagged by a
//! client-chosen id. This crate is the single source of truth for message
//! type names, payload shapes, error shapes and protocol constants.

use std::time::Duration;

pub mod error;
pub mod message;
pub mod payload;

pub use error::{ErrorLocation, GraphQLError, ProtocolError};
pub use message::{MessageType, OperationMessage};
pub use payload::{DataPayload, InitPayload, StartPayload};

/// Sub-protocol name negotiated during the HTTP upgrade.
pub const SUBPROTOCOL: &str = "graphql-ws";

/// Default maximum size of an incoming frame, in bytes.
pub const DEFAULT_READ_LIMIT: usize = 4096;

/// Default deadline applied to each outbound frame write.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

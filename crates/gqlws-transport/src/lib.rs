//! graphql-ws Transport Layer
//!
//! Owns the WebSocket side of the protocol:
//! - HTTP upgrade with `graphql-ws` sub-protocol negotiation
//! - Connection lifecycle (`Unauthenticated` → `Active` → `Closing` → `Closed`)
//! - Init/auth handshake through an optional [`Authenticator`]
//! - Inbound dispatch and a single outbound writer fed by a bounded mailbox
//!
//! The transport contains no GraphQL execution logic. Operations are handed
//! to the [`EventHandlers`] hooks, which the server crate implements.

pub mod auth;
pub mod connection;
pub mod context;
pub mod hooks;
pub mod server;

pub use auth::{AuthError, Authenticator, TokenAuthenticator, TokenIdentity};
pub use connection::{Connection, ConnectionConfig, ConnectionState, DEFAULT_MAILBOX_CAPACITY};
pub use context::ConnectionContext;
pub use hooks::{EventHandlers, NoHandlers};
pub use server::{TransportConfig, TransportError, TransportServer};

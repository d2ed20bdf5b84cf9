//! Authentication of the `connection_init` handshake.
//!
//! Protocol flow:
//!   1. Client upgrades with sub-protocol `graphql-ws`
//!   2. Client sends: { type: "connection_init", payload: { authToken, ... } }
//!   3. Server runs the authenticator (if any) with the payload
//!   4. Success: context replaced, `connection_ack` sent
//!      Failure: `connection_error` sent, connection stays open and may retry

use std::future::Future;
use std::pin::Pin;

use gqlws_protocol::InitPayload;

use crate::connection::Connection;
use crate::context::ConnectionContext;

/// Why an init payload was not accepted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("missing credentials")]
    MissingCredentials,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("{0}")]
    Rejected(String),
}

/// Resolves an init payload into a connection context.
pub trait Authenticator: Send + Sync + 'static {
    fn authenticate(
        &self,
        payload: InitPayload,
        conn: &Connection,
    ) -> impl Future<Output = Result<ConnectionContext, AuthError>> + Send;
}

/// Object-safe version of [`Authenticator`].
pub(crate) trait AuthenticatorDyn: Send + Sync {
    fn authenticate_dyn<'a>(
        &'a self,
        payload: InitPayload,
        conn: &'a Connection,
    ) -> Pin<Box<dyn Future<Output = Result<ConnectionContext, AuthError>> + Send + 'a>>;
}

impl<T: Authenticator> AuthenticatorDyn for T {
    fn authenticate_dyn<'a>(
        &'a self,
        payload: InitPayload,
        conn: &'a Connection,
    ) -> Pin<Box<dyn Future<Output = Result<ConnectionContext, AuthError>> + Send + 'a>> {
        Box::pin(self.authenticate(payload, conn))
    }
}

/// Identity stored in the context by [`TokenAuthenticator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenIdentity {
    /// Id of the connection that presented the token.
    pub connection_id: String,
}

/// Shared-secret authenticator: the init payload must carry the configured
/// token in `authToken` or `Authorization` (an optional `Bearer ` prefix is
/// accepted).
#[derive(Debug, Clone)]
pub struct TokenAuthenticator {
    token: String,
}

impl TokenAuthenticator {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }
}

impl Authenticator for TokenAuthenticator {
    async fn authenticate(
        &self,
        payload: InitPayload,
        conn: &Connection,
    ) -> Result<ConnectionContext, AuthError> {
        let presented = payload.auth_token().ok_or(AuthError::MissingCredentials)?;
        let presented = presented.strip_prefix("Bearer ").unwrap_or(presented);
        if presented != self.token {
            return Err(AuthError::InvalidCredentials);
        }
        Ok(ConnectionContext::new(TokenIdentity {
            connection_id: conn.id().to_string(),
        }))
    }
}

//! Event hooks bridging a [`Connection`] to the rest of the system.

use std::future::Future;
use std::pin::Pin;

use gqlws_protocol::{GraphQLError, StartPayload};

use crate::connection::Connection;

/// Callbacks invoked by a connection's inbound loop.
///
/// The connection contains no GraphQL logic of its own: starting, stopping
/// and tearing down operations is entirely up to the implementor.
pub trait EventHandlers: Send + Sync + 'static {
    /// A client asked to start operation `operation_id`.
    ///
    /// Implementations register the operation, invoke the execution engine
    /// and arrange for results to reach [`Connection::send_data`]. The
    /// returned errors are sent back immediately, tagged with the operation id.
    fn start_operation(
        &self,
        conn: &Connection,
        operation_id: &str,
        payload: StartPayload,
    ) -> impl Future<Output = Vec<GraphQLError>> + Send;

    /// A client stopped operation `operation_id`. Must be a no-op for
    /// unknown or already stopped ids.
    fn stop_operation(&self, conn: &Connection, operation_id: &str);

    /// The connection is closing. Called exactly once per connection,
    /// whatever triggered the close.
    fn close(&self, conn: &Connection);

    /// Number of operations currently running across all connections.
    fn operation_count(&self) -> usize {
        0
    }
}

/// Hooks that ignore every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHandlers;

impl EventHandlers for NoHandlers {
    async fn start_operation(
        &self,
        _conn: &Connection,
        _operation_id: &str,
        _payload: StartPayload,
    ) -> Vec<GraphQLError> {
        Vec::new()
    }

    fn stop_operation(&self, _conn: &Connection, _operation_id: &str) {}

    fn close(&self, _conn: &Connection) {}
}

/// Object-safe version of [`EventHandlers`]; all refs share lifetime `'a`.
pub(crate) trait EventHandlersDyn: Send + Sync {
    fn start_operation_dyn<'a>(
        &'a self,
        conn: &'a Connection,
        operation_id: &'a str,
        payload: StartPayload,
    ) -> Pin<Box<dyn Future<Output = Vec<GraphQLError>> + Send + 'a>>;

    fn stop_operation_dyn(&self, conn: &Connection, operation_id: &str);

    fn close_dyn(&self, conn: &Connection);

    fn operation_count_dyn(&self) -> usize;
}

impl<T: EventHandlers> EventHandlersDyn for T {
    fn start_operation_dyn<'a>(
        &'a self,
        conn: &'a Connection,
        operation_id: &'a str,
        payload: StartPayload,
    ) -> Pin<Box<dyn Future<Output = Vec<GraphQLError>> + Send + 'a>> {
        Box::pin(self.start_operation(conn, operation_id, payload))
    }

    fn stop_operation_dyn(&self, conn: &Connection, operation_id: &str) {
        self.stop_operation(conn, operation_id);
    }

    fn close_dyn(&self, conn: &Connection) {
        self.close(conn);
    }

    fn operation_count_dyn(&self) -> usize {
        self.operation_count()
    }
}

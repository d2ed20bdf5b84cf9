//! SubscriptionServer: the connection hooks wiring Connection, Registry
//! and Executor together.
//!
//! `start` asks the executor for a result stream, registers the operation
//! and spawns its forwarder. `stop` and connection close cancel through the
//! registry; cancellation is idempotent, so the two may race freely.

use std::fmt;
use std::sync::Arc;

use gqlws_protocol::{GraphQLError, StartPayload};
use gqlws_transport::{Connection, EventHandlers};
use tracing::{debug, warn};

use crate::executor::{Executor, OperationContext, OperationRequest};
use crate::forward::forward;
use crate::registry::{OperationHandle, OperationRegistry};

/// Rewrites every error before it reaches a client.
pub type ErrorFormatter = Arc<dyn Fn(GraphQLError) -> GraphQLError + Send + Sync>;

/// Subscription server behaviour.
#[derive(Clone, Default)]
pub struct ServerOptions {
    /// Send `complete` when a result stream ends by itself. Off by default:
    /// clients only learn about natural completion if they opt in here.
    pub complete_on_stream_end: bool,
    pub format_error: Option<ErrorFormatter>,
}

impl ServerOptions {
    pub fn with_complete_on_stream_end(mut self, enabled: bool) -> Self {
        self.complete_on_stream_end = enabled;
        self
    }

    pub fn with_format_error<F>(mut self, formatter: F) -> Self
    where
        F: Fn(GraphQLError) -> GraphQLError + Send + Sync + 'static,
    {
        self.format_error = Some(Arc::new(formatter));
        self
    }

    /// Apply the formatter, if any.
    pub fn format_error(&self, error: GraphQLError) -> GraphQLError {
        match &self.format_error {
            Some(formatter) => formatter(error),
            None => error,
        }
    }
}

impl fmt::Debug for ServerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerOptions")
            .field("complete_on_stream_end", &self.complete_on_stream_end)
            .field("format_error", &self.format_error.is_some())
            .finish()
    }
}

/// [`EventHandlers`] implementation running operations on an [`Executor`].
pub struct SubscriptionServer<E> {
    executor: E,
    registry: Arc<OperationRegistry>,
    options: Arc<ServerOptions>,
}

impl<E: Executor> SubscriptionServer<E> {
    pub fn new(executor: E) -> Self {
        Self {
            executor,
            registry: Arc::new(OperationRegistry::new()),
            options: Arc::new(ServerOptions::default()),
        }
    }

    pub fn with_options(mut self, options: ServerOptions) -> Self {
        self.options = Arc::new(options);
        self
    }

    /// Share an existing registry instead of a private one.
    pub fn with_registry(mut self, registry: Arc<OperationRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn registry(&self) -> &Arc<OperationRegistry> {
        &self.registry
    }

    pub fn options(&self) -> &ServerOptions {
        &self.options
    }
}

impl<E: Executor> EventHandlers for SubscriptionServer<E> {
    async fn start_operation(
        &self,
        conn: &Connection,
        operation_id: &str,
        payload: StartPayload,
    ) -> Vec<GraphQLError> {
        let request = OperationRequest::from(payload);
        let handle = OperationHandle::new();
        let ctx = OperationContext {
            connection_id: conn.id().to_string(),
            operation_id: operation_id.to_string(),
            context: conn.context(),
            cancellation: handle.token(),
        };

        let stream = match self.executor.subscribe(request, ctx).await {
            Ok(stream) => stream,
            Err(errors) => {
                debug!(conn = %conn.id(), op = %operation_id, "operation rejected by executor");
                return errors
                    .into_iter()
                    .map(|err| self.options.format_error(err))
                    .collect();
            }
        };

        if let Some(displaced) = self.registry.add(conn.id(), operation_id, handle.clone()) {
            warn!(conn = %conn.id(), op = %operation_id, "operation id reused, cancelling previous operation");
            displaced.cancel();
        }
        // The close hook may have run while the executor was subscribing.
        if conn.is_closed() {
            self.registry.remove(conn.id(), operation_id);
            return Vec::new();
        }

        tokio::spawn(forward(
            conn.clone(),
            operation_id.to_string(),
            handle,
            stream,
            self.registry.clone(),
            self.options.clone(),
        ));
        Vec::new()
    }

    fn stop_operation(&self, conn: &Connection, operation_id: &str) {
        if !self.registry.remove(conn.id(), operation_id) {
            debug!(conn = %conn.id(), op = %operation_id, "stop for unknown operation");
        }
    }

    fn close(&self, conn: &Connection) {
        self.registry.remove_connection(conn.id());
    }

    fn operation_count(&self) -> usize {
        self.registry.len()
    }
}

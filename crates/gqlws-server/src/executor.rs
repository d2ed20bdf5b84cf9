//! The execution-engine seam.
//!
//! The server never validates or resolves GraphQL itself. It hands each
//! started operation to an [`Executor`], which returns a stream of results
//! that stops once the operation's cancellation token fires.

use std::future::Future;

use futures_util::stream::BoxStream;
use gqlws_protocol::{GraphQLError, StartPayload};
use gqlws_transport::ConnectionContext;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

/// Stream of results produced for one operation.
pub type ResultStream = BoxStream<'static, ExecutionResult>;

/// One event of a result stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionResult {
    pub data: Value,
    pub errors: Vec<GraphQLError>,
}

impl ExecutionResult {
    pub fn new(data: Value) -> Self {
        Self {
            data,
            errors: Vec::new(),
        }
    }

    /// A result carrying only errors.
    pub fn from_errors(errors: Vec<GraphQLError>) -> Self {
        Self {
            data: Value::Null,
            errors,
        }
    }

    pub fn with_error(mut self, error: GraphQLError) -> Self {
        self.errors.push(error);
        self
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// A parsed `start` request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationRequest {
    pub query: String,
    pub variables: Map<String, Value>,
    pub operation_name: Option<String>,
    pub extensions: Option<Value>,
}

impl From<StartPayload> for OperationRequest {
    fn from(payload: StartPayload) -> Self {
        Self {
            query: payload.query,
            variables: payload.variables.unwrap_or_default(),
            operation_name: payload.operation_name,
            extensions: payload.extensions,
        }
    }
}

/// Everything an executor knows about where an operation runs.
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub connection_id: String,
    pub operation_id: String,
    /// Context produced by the connection's authenticator.
    pub context: ConnectionContext,
    /// Fires on `stop`, connection close or id reuse.
    pub cancellation: CancellationToken,
}

/// GraphQL execution engine.
pub trait Executor: Send + Sync + 'static {
    /// Start `request`. Immediate failures (parse, validation) are returned
    /// as errors and the operation is not registered.
    fn subscribe(
        &self,
        request: OperationRequest,
        ctx: OperationContext,
    ) -> impl Future<Output = Result<ResultStream, Vec<GraphQLError>>> + Send;
}

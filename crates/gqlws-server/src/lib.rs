//! graphql-ws Server: operations on top of the transport.
//!
//! Owns the operation registry and implements the transport's
//! [`EventHandlers`](gqlws_transport::EventHandlers) by running each started
//! operation on an [`Executor`] and forwarding its results to the client.

pub mod executor;
mod forward;
pub mod registry;
pub mod subscription;

pub use executor::{ExecutionResult, Executor, OperationContext, OperationRequest, ResultStream};
pub use registry::{OperationHandle, OperationRegistry};
pub use subscription::{ErrorFormatter, ServerOptions, SubscriptionServer};

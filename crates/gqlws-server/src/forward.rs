//! Per-operation result forwarding.

use std::sync::Arc;

use futures_util::StreamExt;
use gqlws_protocol::DataPayload;
use gqlws_transport::Connection;
use tracing::debug;

use crate::executor::{ExecutionResult, ResultStream};
use crate::registry::{OperationHandle, OperationRegistry};
use crate::subscription::ServerOptions;

/// Pump `stream` into the connection until it ends or `handle` is cancelled.
///
/// Cancellation wins over both the next result and a send blocked on a full
/// mailbox, so nothing is delivered for an operation once it is stopped.
pub(crate) async fn forward(
    conn: Connection,
    operation_id: String,
    handle: OperationHandle,
    mut stream: ResultStream,
    registry: Arc<OperationRegistry>,
    options: Arc<ServerOptions>,
) {
    let token = handle.token();

    loop {
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!(conn = %conn.id(), op = %operation_id, "operation cancelled");
                return;
            }
            next = stream.next() => next,
        };
        let Some(result) = next else { break };

        let payload = to_payload(result, &options);
        let delivered = tokio::select! {
            biased;
            _ = token.cancelled() => return,
            delivered = conn.send_data(&operation_id, &payload) => delivered,
        };
        if !delivered {
            // Connection is gone; its close hook cleans up the registry.
            return;
        }
    }

    debug!(conn = %conn.id(), op = %operation_id, "result stream ended");
    if registry.remove_if_current(conn.id(), &operation_id, handle.serial())
        && options.complete_on_stream_end
    {
        conn.send_complete(&operation_id).await;
    }
}

fn to_payload(result: ExecutionResult, options: &ServerOptions) -> DataPayload {
    let errors = result
        .errors
        .into_iter()
        .inspect(|err| debug!("subscription error: {err}"))
        .map(|err| options.format_error(err))
        .collect();
    DataPayload::new(result.data, errors)
}

//! Demo executor: every subscription on `tick` receives `{"tick": n}` on a
//! fixed interval. An optional `$limit` variable ends the stream after that
//! many ticks.

use std::time::Duration;

use futures_util::{StreamExt, stream};
use gqlws_protocol::GraphQLError;
use gqlws_server::{ExecutionResult, Executor, OperationContext, OperationRequest, ResultStream};
use serde_json::{Value, json};
use tokio::time::MissedTickBehavior;
use tracing::debug;

pub struct TickerExecutor {
    interval: Duration,
}

impl TickerExecutor {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Executor for TickerExecutor {
    async fn subscribe(
        &self,
        request: OperationRequest,
        ctx: OperationContext,
    ) -> Result<ResultStream, Vec<GraphQLError>> {
        if !request.query.contains("tick") {
            return Err(vec![GraphQLError::new(
                "Cannot query field: the demo schema only has `tick`",
            )]);
        }
        let limit = match request.variables.get("limit") {
            None | Some(Value::Null) => None,
            Some(value) => Some(value.as_u64().ok_or_else(|| {
                vec![GraphQLError::new(
                    "Variable \"$limit\" must be a non-negative integer",
                )]
            })?),
        };

        debug!(conn = %ctx.connection_id, op = %ctx.operation_id, ?limit, "ticker subscribed");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let ticks = stream::unfold((ticker, 1u64), |(mut ticker, n)| async move {
            ticker.tick().await;
            Some((ExecutionResult::new(json!({ "tick": n })), (ticker, n + 1)))
        })
        .take_until(ctx.cancellation.cancelled_owned());

        Ok(match limit {
            Some(limit) => ticks
                .take(usize::try_from(limit).unwrap_or(usize::MAX))
                .boxed(),
            None => ticks.boxed(),
        })
    }
}

use std::time::Instant;

use async_trait::async_trait;
use metrics::{counter, histogram};
use tether_core::metric_names::{
    EVENT_DISPATCH_DURATION_SECONDS, EVENT_ERRORS_TOTAL, EVENTS_ROUTED_TOTAL,
};
use tether_core::{CancellationToken, ConnectionRef, EventMessage, Result};

use super::{EventMiddleware, Next};

/// Records routed events, failures and dispatch latency per event type.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsMiddleware;

#[async_trait]
impl EventMiddleware for MetricsMiddleware {
    async fn handle(
        &self,
        ctx: &CancellationToken,
        conn: &ConnectionRef,
        event: &EventMessage,
        next: Next<'_>,
    ) -> Result<()> {
        let event_type = event.event_type.clone();
        counter!(EVENTS_ROUTED_TOTAL, "type" => event_type.clone()).increment(1);

        let start = Instant::now();
        let result = next.run(ctx, conn, event).await;
        histogram!(EVENT_DISPATCH_DURATION_SECONDS, "type" => event_type.clone())
            .record(start.elapsed().as_secs_f64());

        if let Err(err) = &result {
            counter!(EVENT_ERRORS_TOTAL, "type" => event_type, "error_type" => err.code())
                .increment(1);
        }
        result
    }
}

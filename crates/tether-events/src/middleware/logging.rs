use std::time::Instant;

use async_trait::async_trait;
use tether_core::{CancellationToken, ConnectionRef, EventMessage, Result};
use tracing::{debug, warn};

use super::{EventMiddleware, Next};

/// Logs each event with its outcome and latency.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingMiddleware;

#[async_trait]
impl EventMiddleware for LoggingMiddleware {
    async fn handle(
        &self,
        ctx: &CancellationToken,
        conn: &ConnectionRef,
        event: &EventMessage,
        next: Next<'_>,
    ) -> Result<()> {
        let start = Instant::now();
        debug!(
            conn_id = conn.id(),
            event_type = %event.event_type,
            namespace = event.namespace().unwrap_or(""),
            "event received"
        );
        let result = next.run(ctx, conn, event).await;
        let elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        match &result {
            Ok(()) => debug!(
                conn_id = conn.id(),
                event_type = %event.event_type,
                elapsed_ms,
                "event handled"
            ),
            Err(err) => warn!(
                conn_id = conn.id(),
                event_type = %event.event_type,
                elapsed_ms,
                code = err.code(),
                error = %err,
                "event failed"
            ),
        }
        result
    }
}

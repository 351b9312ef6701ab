use std::time::Duration;

use async_trait::async_trait;
use tether_core::{CancellationToken, ConnectionRef, EventError, EventMessage, Result};
use tracing::warn;

use super::{EventMiddleware, Next};

/// Bounds the time the rest of the chain may take.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutMiddleware {
    budget: Duration,
}

impl TimeoutMiddleware {
    /// Fail downstream processing that runs longer than `budget`.
    pub fn new(budget: Duration) -> Self {
        Self { budget }
    }
}

#[async_trait]
impl EventMiddleware for TimeoutMiddleware {
    async fn handle(
        &self,
        ctx: &CancellationToken,
        conn: &ConnectionRef,
        event: &EventMessage,
        next: Next<'_>,
    ) -> Result<()> {
        match tokio::time::timeout(self.budget, next.run(ctx, conn, event)).await {
            Ok(result) => result,
            Err(_elapsed) => {
                warn!(
                    conn_id = conn.id(),
                    event_type = %event.event_type,
                    budget_ms = u64::try_from(self.budget.as_millis()).unwrap_or(u64::MAX),
                    "event handling timed out"
                );
                Err(EventError::Timeout {
                    event_type: event.event_type.clone(),
                    after: self.budget,
                })
            }
        }
    }
}

//! Feeds inbound `"ack"` events to an [`AckManager`].

use async_trait::async_trait;
use tether_core::{CancellationToken, ConnectionRef, EventAck, EventMessage, Result};
use tether_events::{EventMiddleware, Next};
use tracing::debug;

use crate::manager::AckManager;

/// Intercepts `"ack"` events and resolves them through the manager.
///
/// Ack events stop here; every other event continues down the chain. Install
/// it first so acks never reach ordinary handlers.
pub struct AckMiddleware {
    manager: AckManager,
}

impl AckMiddleware {
    /// Route acks to `manager`.
    pub fn new(manager: AckManager) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl EventMiddleware for AckMiddleware {
    async fn handle(
        &self,
        ctx: &CancellationToken,
        conn: &ConnectionRef,
        event: &EventMessage,
        next: Next<'_>,
    ) -> Result<()> {
        if !event.is_ack() {
            return next.run(ctx, conn, event).await;
        }
        let ack: EventAck = serde_json::from_value(event.data.clone())?;
        debug!(conn_id = conn.id(), ack_id = %ack.id, "ack intercepted");
        self.manager.handle_ack(ack)
    }
}

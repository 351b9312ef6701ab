use std::collections::HashSet;

use async_trait::async_trait;
use tether_core::{CancellationToken, ConnectionRef, EventMessage, Result};
use tracing::warn;

use super::{EventMiddleware, Next};
use crate::auth::AuthorizerRef;

/// Halts the chain with `Unauthorized` unless the authorizer admits the
/// connection. Exempt event types always pass.
pub struct AuthMiddleware {
    authorizer: AuthorizerRef,
    exempt: HashSet<String>,
}

impl AuthMiddleware {
    /// Gate every event behind `authorizer`.
    pub fn new(authorizer: AuthorizerRef) -> Self {
        Self {
            authorizer,
            exempt: HashSet::new(),
        }
    }

    /// Let `event_type` through without authorization.
    #[must_use]
    pub fn exempt(mut self, event_type: impl Into<String>) -> Self {
        let _ = self.exempt.insert(event_type.into());
        self
    }
}

#[async_trait]
impl EventMiddleware for AuthMiddleware {
    async fn handle(
        &self,
        ctx: &CancellationToken,
        conn: &ConnectionRef,
        event: &EventMessage,
        next: Next<'_>,
    ) -> Result<()> {
        if !self.exempt.contains(&event.event_type) {
            if let Err(err) = self.authorizer.authorize(ctx, conn).await {
                warn!(
                    conn_id = conn.id(),
                    event_type = %event.event_type,
                    error = %err,
                    "event refused"
                );
                return Err(err);
            }
        }
        next.run(ctx, conn, event).await
    }
}

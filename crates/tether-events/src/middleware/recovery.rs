use std::any::Any;
use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use futures::FutureExt;
use tether_core::{CancellationToken, ConnectionRef, EventError, EventMessage, Result};
use tracing::error;

use super::{EventMiddleware, Next};

/// Turns a panic anywhere downstream into [`EventError::Panicked`].
#[derive(Debug, Default, Clone, Copy)]
pub struct RecoveryMiddleware;

#[async_trait]
impl EventMiddleware for RecoveryMiddleware {
    async fn handle(
        &self,
        ctx: &CancellationToken,
        conn: &ConnectionRef,
        event: &EventMessage,
        next: Next<'_>,
    ) -> Result<()> {
        match AssertUnwindSafe(next.run(ctx, conn, event)).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(
                    conn_id = conn.id(),
                    event_type = %event.event_type,
                    panic = %message,
                    "handler panicked"
                );
                Err(EventError::Panicked {
                    event_type: event.event_type.clone(),
                    message,
                })
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

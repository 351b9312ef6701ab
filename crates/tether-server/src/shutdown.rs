//! Graceful shutdown coordination via `CancellationToken`.

use std::time::Duration;

use tether_core::CancellationToken;
use tether_core::connection::CLOSE_GOING_AWAY;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::websocket::registry::ConnectionRegistry;

/// Default timeout for graceful shutdown before giving up on tasks.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Root cancellation token for the server.
///
/// Every connection context is a child of [`token`](Self::token), so
/// shutting down also cancels every session.
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Get a clone of the cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Initiate shutdown.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether a shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Close every connection, cancel the token and wait for `handles`.
    ///
    /// Close frames are queued before cancellation so session writers flush
    /// them on the way out. Tasks still running after `timeout` are left
    /// behind with a warning.
    pub async fn drain(
        &self,
        registry: &ConnectionRegistry,
        handles: Vec<JoinHandle<()>>,
        timeout: Option<Duration>,
    ) {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);
        registry
            .close_all(CLOSE_GOING_AWAY, "server shutting down")
            .await;
        self.shutdown();
        info!(
            task_count = handles.len(),
            timeout_secs = timeout.as_secs(),
            "waiting for tasks to complete"
        );

        let drain = futures::future::join_all(handles);
        if tokio::time::timeout(timeout, drain).await.is_err() {
            warn!("shutdown timed out after {timeout:?}, some tasks may still be running");
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::websocket::connection::{Outbound, WsConnection};
    use tether_core::Connection;
    use tokio::sync::mpsc;

    #[test]
    fn shutdown_is_idempotent_and_propagates() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        assert!(!coord.is_shutting_down());
        coord.shutdown();
        coord.shutdown();
        assert!(coord.is_shutting_down());
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn drain_waits_for_tasks() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        let handle = tokio::spawn(async move { token.cancelled().await });
        coord
            .drain(
                &ConnectionRegistry::new(),
                vec![handle],
                Some(Duration::from_secs(1)),
            )
            .await;
        assert!(coord.is_shutting_down());
    }

    #[tokio::test(start_paused = true)]
    async fn drain_gives_up_after_timeout() {
        let coord = ShutdownCoordinator::new();
        let stuck = tokio::spawn(std::future::pending::<()>());
        coord
            .drain(
                &ConnectionRegistry::new(),
                vec![stuck],
                Some(Duration::from_millis(50)),
            )
            .await;
        assert!(coord.is_shutting_down());
    }

    #[tokio::test]
    async fn drain_sends_going_away_and_cancels_children() {
        let coord = ShutdownCoordinator::new();
        let registry = ConnectionRegistry::new();
        let (tx, mut rx) = mpsc::channel(4);
        let conn = Arc::new(WsConnection::new("c".into(), tx, &coord.token()));
        let _ = registry.add(conn.clone());

        coord.drain(&registry, Vec::new(), None).await;

        assert!(conn.context().is_cancelled());
        assert!(matches!(
            rx.recv().await,
            Some(Outbound::Close { code: CLOSE_GOING_AWAY, .. })
        ));
    }
}

//! Settings to components.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tether_ack::{AckBatcher, AckManager, AckMiddleware};
use tether_core::{CancellationToken, Connection, ConnectionRef, EventAck, EventMessage, Result};
use tether_events::middleware::{LoggingMiddleware, RecoveryMiddleware, TimeoutMiddleware};
use tether_events::{EventMiddleware, EventRouter, HistoryConfig, Next, RouterConfig};
use tether_server::{LifecycleHooks, ServerConfig};
use tether_settings::{BatcherSettings, RouterSettings, ServerSettings, TetherSettings};
use tracing::{debug, info};

use crate::builtins;

/// Router options from settings. A zero history size disables history and a
/// zero TTL keeps entries until evicted.
pub fn router_config(settings: &RouterSettings) -> RouterConfig {
    let history = (settings.history_size > 0).then(|| HistoryConfig {
        max_size: settings.history_size,
        ttl: (settings.history_ttl_secs > 0)
            .then(|| Duration::from_secs(settings.history_ttl_secs)),
    });
    RouterConfig {
        validate: settings.validate_events,
        history,
    }
}

/// Transport options from settings.
pub fn server_config(settings: &ServerSettings) -> ServerConfig {
    ServerConfig {
        host: settings.host.clone(),
        port: settings.port,
        max_connections: settings.max_connections,
        heartbeat_interval_ms: settings.heartbeat_interval_ms,
        heartbeat_timeout_ms: settings.heartbeat_timeout_ms,
        max_message_size: settings.max_message_size,
        send_queue_capacity: settings.send_queue_capacity,
        max_inflight_per_connection: settings.max_inflight_per_connection,
    }
}

/// Batcher that logs a summary of each flushed batch.
pub fn summary_batcher(settings: &BatcherSettings) -> AckBatcher {
    AckBatcher::new(
        settings.max_size,
        Duration::from_millis(settings.interval_ms),
        |batch: Vec<EventAck>| {
            let succeeded = batch.iter().filter(|ack| ack.success).count();
            info!(
                count = batch.len(),
                succeeded,
                failed = batch.len() - succeeded,
                "acks resolved"
            );
        },
    )
}

/// Everything the daemon runs besides the transport.
pub struct Daemon {
    /// Router with middleware and built-in events installed.
    pub router: EventRouter,
    /// Pending server-to-client requests.
    pub acks: AckManager,
    /// Collects acks resolved by clients.
    pub batcher: AckBatcher,
}

impl Daemon {
    /// Assemble the router, ack manager and batcher, creating the configured
    /// namespaces.
    ///
    /// Chain order: ack tap, ack middleware, logging, recovery, handler
    /// timeout.
    pub fn build(settings: &TetherSettings) -> Result<Self> {
        let router = EventRouter::with_config(router_config(&settings.router));
        for name in &settings.router.namespaces {
            let _ = router.namespace(name);
        }
        let acks = AckManager::new(Duration::from_millis(settings.acks.timeout_ms));
        let batcher = summary_batcher(&settings.batcher);

        router.use_middleware(Arc::new(AckTap::new(batcher.clone())));
        router.use_middleware(Arc::new(AckMiddleware::new(acks.clone())));
        router.use_middleware(Arc::new(LoggingMiddleware));
        router.use_middleware(Arc::new(RecoveryMiddleware));
        router.use_middleware(Arc::new(TimeoutMiddleware::new(Duration::from_millis(
            settings.server.handler_timeout_ms,
        ))));
        builtins::register(&router)?;

        Ok(Self {
            router,
            acks,
            batcher,
        })
    }
}

// ── Ack tap ─────────────────────────────────────────────────────────

/// Copies every ack that resolves successfully downstream into a batcher.
pub struct AckTap {
    batcher: AckBatcher,
}

impl AckTap {
    /// Tap feeding `batcher`.
    pub fn new(batcher: AckBatcher) -> Self {
        Self { batcher }
    }
}

#[async_trait]
impl EventMiddleware for AckTap {
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
        let ack = serde_json::from_value::<EventAck>(event.data.clone()).ok();
        next.run(ctx, conn, event).await?;
        if let Some(ack) = ack {
            self.batcher.add(ack);
        }
        Ok(())
    }
}

// ── Lifecycle ───────────────────────────────────────────────────────

/// Greets new connections and drops departed ones from every namespace.
pub struct DaemonHooks {
    router: EventRouter,
}

impl DaemonHooks {
    /// Hooks maintaining membership in `router`'s namespaces.
    pub fn new(router: EventRouter) -> Self {
        Self { router }
    }
}

#[async_trait]
impl LifecycleHooks for DaemonHooks {
    async fn on_connect(&self, conn: &ConnectionRef) -> Result<()> {
        conn.emit_with_context(
            &conn.context(),
            "connection.established",
            json!({ "connectionId": conn.id() }),
        )
        .await?;
        Ok(())
    }

    async fn on_disconnect(&self, conn: &ConnectionRef) {
        let mut left = 0_usize;
        for name in self.router.namespace_names() {
            if self
                .router
                .get_namespace(&name)
                .is_some_and(|ns| ns.leave(conn.id()))
            {
                left += 1;
            }
        }
        debug!(conn_id = conn.id(), namespaces = left, "memberships released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tether_core::EventError;
    use tether_core::testing::RecordingConnection;
    use tokio::sync::mpsc;

    #[test]
    fn zero_history_size_disables_history() {
        let settings = RouterSettings {
            history_size: 0,
            ..RouterSettings::default()
        };
        assert_eq!(router_config(&settings).history, None);
    }

    #[test]
    fn zero_ttl_means_no_expiry() {
        let settings = RouterSettings {
            history_size: 5,
            history_ttl_secs: 0,
            validate_events: false,
            ..RouterSettings::default()
        };
        let config = router_config(&settings);
        assert!(!config.validate);
        assert_eq!(
            config.history,
            Some(HistoryConfig {
                max_size: 5,
                ttl: None
            })
        );
    }

    #[test]
    fn server_config_carries_every_field() {
        let settings = ServerSettings {
            port: 9000,
            max_connections: 7,
            max_inflight_per_connection: 3,
            ..ServerSettings::default()
        };
        let config = server_config(&settings);
        assert_eq!(config.port, 9000);
        assert_eq!(config.max_connections, 7);
        assert_eq!(config.max_inflight_per_connection, 3);
        assert_eq!(config.host, settings.host);
        assert_eq!(config.send_queue_capacity, settings.send_queue_capacity);
    }

    #[tokio::test]
    async fn build_creates_configured_namespaces_only() {
        let mut settings = TetherSettings::default();
        settings.router.namespaces = vec!["lobby".into(), "ops".into()];
        let Daemon { router, .. } = Daemon::build(&settings).unwrap();

        let mut names = router.namespace_names();
        names.sort();
        assert_eq!(names, vec!["lobby".to_owned(), "ops".to_owned()]);

        let conn = RecordingConnection::new("c").into_ref();
        let ctx = CancellationToken::new();
        let mut join = EventMessage::new("namespace.join", json!({"namespace": "lobby"}));
        router.route_event(&ctx, &conn, &mut join).await.unwrap();
        assert!(router.get_namespace("lobby").unwrap().is_member("c"));

        let mut stray = EventMessage::new("namespace.join", json!({"namespace": "elsewhere"}));
        assert_matches!(
            router.route_event(&ctx, &conn, &mut stray).await,
            Err(EventError::InvalidArgument { .. })
        );
        assert_eq!(router.namespace_names().len(), 2);
    }

    #[tokio::test]
    async fn resolved_client_acks_reach_the_batcher() {
        let (tx, mut flushed) = mpsc::unbounded_channel();
        let batcher = AckBatcher::new(10, Duration::from_secs(60), move |batch| {
            let _ = tx.send(batch);
        });
        let acks = AckManager::default();
        let router = EventRouter::new();
        router.use_middleware(Arc::new(AckTap::new(batcher.clone())));
        router.use_middleware(Arc::new(AckMiddleware::new(acks.clone())));

        let ctx = CancellationToken::new();
        let conn = RecordingConnection::new("c").into_ref();
        let ack_id = acks
            .send_with_callback(&ctx, &conn, EventMessage::new("job", json!(1)), |_| {}, None)
            .await
            .unwrap();

        let mut reply = EventMessage::ack(&EventAck::success(&ack_id, None)).unwrap();
        router.route_event(&ctx, &conn, &mut reply).await.unwrap();

        let mut ghost = EventMessage::ack(&EventAck::success("ack_ghost", None)).unwrap();
        assert_matches!(
            router.route_event(&ctx, &conn, &mut ghost).await,
            Err(EventError::NoPendingAck { .. })
        );

        assert_eq!(batcher.pending_len(), 1);
        batcher.flush();
        let batch = flushed.recv().await.unwrap();
        let acked: Vec<&str> = batch.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(acked, vec![ack_id.as_str()]);
    }

    #[tokio::test]
    async fn disconnect_releases_memberships() {
        let router = EventRouter::new();
        let hooks = DaemonHooks::new(router.clone());
        let conn = RecordingConnection::new("c").into_ref();
        let ctx = CancellationToken::new();
        for name in ["a", "b"] {
            router.namespace(name).join(&ctx, &conn).await.unwrap();
        }
        let _ = router.namespace("c");

        hooks.on_disconnect(&conn).await;

        for name in ["a", "b", "c"] {
            assert_eq!(router.get_namespace(name).unwrap().member_count(), 0);
        }
    }

    #[tokio::test]
    async fn connect_greets_with_connection_id() {
        let hooks = DaemonHooks::new(EventRouter::new());
        let rec = Arc::new(RecordingConnection::new("c42"));
        let conn: ConnectionRef = rec.clone();
        hooks.on_connect(&conn).await.unwrap();
        assert_eq!(
            rec.emitted(),
            vec![(
                "connection.established".to_owned(),
                json!({"connectionId": "c42"})
            )]
        );
    }
}

//! WebSocket session lifecycle: handles a single connected client from
//! upgrade through disconnect.

use std::future::Future;
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tether_core::connection::{CLOSE_GOING_AWAY, CLOSE_POLICY_VIOLATION};
use tether_core::{
    CancellationToken, Connection, ConnectionRef, ERROR_EVENT_TYPE, EventError, EventMessage,
};
use tether_events::EventRouter;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tracing::{Instrument, debug, info, instrument, warn};

use super::connection::{Outbound, WsConnection};
use super::heartbeat::{HeartbeatResult, run_heartbeat};
use super::lifecycle::LifecycleFunnel;
use crate::config::ServerConfig;

/// Shared pieces every session needs.
#[derive(Clone)]
pub(crate) struct SessionDeps {
    pub router: EventRouter,
    pub funnel: Arc<LifecycleFunnel>,
    pub config: Arc<ServerConfig>,
}

/// Run a WebSocket session for an upgraded client.
///
/// 1. Registers the connection through the funnel (`on_connect`)
/// 2. Spawns the writer (drains the outbound queue) and heartbeat tasks
/// 3. Decodes each inbound frame. Acks are routed inline; everything else is
///    routed on its own task, so a handler awaiting an acknowledgment from
///    this same peer cannot stall the reader. At most
///    `max_inflight_per_connection` routing tasks run at once
/// 4. Stops the routing tasks, tears everything down and runs
///    `on_disconnect` once
#[instrument(skip_all, fields(conn_id = %conn.id()))]
pub(crate) async fn run_ws_session(
    socket: WebSocket,
    conn: Arc<WsConnection>,
    outbound: mpsc::Receiver<Outbound>,
    deps: SessionDeps,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    if let Err(err) = deps.funnel.connect(&conn).await {
        let frame = CloseFrame {
            code: CLOSE_POLICY_VIOLATION,
            reason: err.to_string().into(),
        };
        let _ = ws_tx.send(Message::Close(Some(frame))).await;
        conn.terminate();
        return;
    }

    let ctx = conn.context();
    let writer = tokio::spawn(write_loop(ws_tx, outbound, ctx.clone()).in_current_span());

    let heartbeat = {
        let conn = Arc::clone(&conn);
        let interval = deps.config.heartbeat_interval();
        let timeout = deps.config.heartbeat_timeout();
        let cancel = ctx.clone();
        tokio::spawn(
            async move {
                if run_heartbeat(conn.clone(), interval, timeout, cancel).await
                    == HeartbeatResult::TimedOut
                {
                    let idle_ms = u64::try_from(conn.idle_for().as_millis()).unwrap_or(u64::MAX);
                    warn!(idle_ms, "client unresponsive, disconnecting");
                    let _ = conn.close(CLOSE_GOING_AWAY, "heartbeat timeout").await;
                }
            }
            .in_current_span(),
        )
    };

    let conn_ref: ConnectionRef = conn.clone();
    let mut inflight = InflightRoutes::new(deps.config.max_inflight_per_connection);

    loop {
        let frame = tokio::select! {
            () = ctx.cancelled() => break,
            frame = ws_rx.next() => frame,
        };
        let msg = match frame {
            Some(Ok(msg)) => msg,
            Some(Err(err)) => {
                debug!(error = %err, "websocket read failed");
                break;
            }
            None => break,
        };
        conn.mark_alive();

        let text = match msg {
            Message::Text(t) => t.as_str().to_owned(),
            Message::Binary(data) => match String::from_utf8(data.to_vec()) {
                Ok(s) => s,
                Err(_) => {
                    let err = EventError::invalid_argument("binary frame is not UTF-8");
                    report(&conn_ref, &ctx, &err).await;
                    continue;
                }
            },
            Message::Close(_) => {
                info!("client sent close frame");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => continue,
        };

        let Some(event) = decode(&conn_ref, &ctx, &text).await else {
            continue;
        };
        if event.is_ack() {
            route(&deps.router, &conn_ref, &ctx, event).await;
            continue;
        }
        let task = {
            let router = deps.router.clone();
            let conn = Arc::clone(&conn_ref);
            let ctx = ctx.clone();
            async move { route(&router, &conn, &ctx, event).await }.in_current_span()
        };
        if !inflight.spawn(&ctx, task).await {
            break;
        }
    }

    conn.terminate();
    inflight.shutdown().await;
    heartbeat.abort();
    let _ = deps.funnel.disconnect(&conn).await;
    if writer.await.is_err() {
        debug!("writer task ended abnormally");
    }
    if conn.drop_count() > 0 {
        warn!(dropped = conn.drop_count(), "outbound frames dropped during session");
    }
}

// ── Routing ─────────────────────────────────────────────────────────

/// Routing tasks of one connection, bounded by a semaphore.
struct InflightRoutes {
    tasks: JoinSet<()>,
    permits: Arc<Semaphore>,
}

impl InflightRoutes {
    fn new(limit: usize) -> Self {
        Self {
            tasks: JoinSet::new(),
            permits: Arc::new(Semaphore::new(limit.clamp(1, Semaphore::MAX_PERMITS))),
        }
    }

    /// Spawn `task` once a slot is free. Returns `false` without spawning if
    /// `ctx` is cancelled while waiting.
    async fn spawn<F>(&mut self, ctx: &CancellationToken, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        while self.tasks.try_join_next().is_some() {}
        let permit = tokio::select! {
            () = ctx.cancelled() => return false,
            permit = Arc::clone(&self.permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_closed) => return false,
            },
        };
        let _ = self.tasks.spawn(async move {
            task.await;
            drop(permit);
        });
        true
    }

    /// Abort the tasks still running and wait until all of them are gone.
    async fn shutdown(mut self) {
        self.tasks.shutdown().await;
    }
}

/// Decode one inbound frame, reporting undecodable ones to the peer.
async fn decode(
    conn: &ConnectionRef,
    ctx: &CancellationToken,
    text: &str,
) -> Option<EventMessage> {
    match serde_json::from_str(text) {
        Ok(event) => Some(event),
        Err(err) => {
            debug!(error = %err, "undecodable frame");
            report(conn, ctx, &EventError::from(err)).await;
            None
        }
    }
}

/// Hand one event to the router, reporting failures to the peer.
async fn route(
    router: &EventRouter,
    conn: &ConnectionRef,
    ctx: &CancellationToken,
    mut event: EventMessage,
) {
    if let Err(err) = router.route_event(ctx, conn, &mut event).await {
        debug!(event_type = %event.event_type, error = %err, "routing failed");
        report(conn, ctx, &err).await;
    }
}

/// Tell the peer something went wrong with an `"error"` event.
async fn report(conn: &ConnectionRef, ctx: &CancellationToken, err: &EventError) {
    let body = match serde_json::to_value(err.to_error_body()) {
        Ok(body) => body,
        Err(e) => {
            warn!(error = %e, "failed to encode error body");
            return;
        }
    };
    if let Err(send_err) = conn.emit_with_context(ctx, ERROR_EVENT_TYPE, body).await {
        debug!(error = %send_err, "error event not delivered");
    }
}

/// Drain the outbound queue into the socket.
///
/// Stops after a close frame, a write failure, or cancellation. On
/// cancellation frames already queued (typically a close frame) are still
/// flushed.
async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Outbound>,
    ctx: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            biased;
            frame = outbound.recv() => frame,
            () = ctx.cancelled() => {
                while let Ok(frame) = outbound.try_recv() {
                    if !write_frame(&mut ws_tx, frame).await {
                        break;
                    }
                }
                break;
            }
        };
        match next {
            Some(frame) => {
                if !write_frame(&mut ws_tx, frame).await {
                    break;
                }
            }
            None => break,
        }
    }
    let _ = ws_tx.close().await;
}

/// Write one frame. Returns `false` when the writer should stop.
async fn write_frame(ws_tx: &mut SplitSink<WebSocket, Message>, frame: Outbound) -> bool {
    let (msg, keep_going) = match frame {
        Outbound::Text(text) => (Message::Text(text.into()), true),
        Outbound::Ping => (Message::Ping(Vec::new().into()), true),
        Outbound::Close { code, reason } => (
            Message::Close(Some(CloseFrame {
                code,
                reason: reason.into(),
            })),
            false,
        ),
    };
    match ws_tx.send(msg).await {
        Ok(()) => keep_going,
        Err(err) => {
            debug!(error = %err, "websocket write failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::sync::oneshot;

    /// Sets its flag when dropped, i.e. when the owning task is gone.
    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn spawn_waits_for_a_free_slot() {
        let mut routes = InflightRoutes::new(1);
        let ctx = CancellationToken::new();
        let (release, released) = oneshot::channel::<()>();
        assert!(
            routes
                .spawn(&ctx, async move {
                    let _ = released.await;
                })
                .await
        );

        let (ran_tx, ran_rx) = oneshot::channel();
        {
            let second = routes.spawn(&ctx, async move {
                let _ = ran_tx.send(());
            });
            tokio::pin!(second);
            assert!(
                tokio::time::timeout(Duration::from_millis(20), &mut second)
                    .await
                    .is_err()
            );
            release.send(()).unwrap();
            assert!(second.await);
        }
        ran_rx.await.unwrap();
        routes.shutdown().await;
    }

    #[tokio::test]
    async fn cancellation_stops_waiting_for_a_slot() {
        let mut routes = InflightRoutes::new(1);
        let ctx = CancellationToken::new();
        assert!(routes.spawn(&ctx, std::future::pending()).await);

        ctx.cancel();
        let (ran_tx, mut ran_rx) = oneshot::channel::<()>();
        assert!(
            !routes
                .spawn(&ctx, async move {
                    let _ = ran_tx.send(());
                })
                .await
        );
        routes.shutdown().await;
        assert!(ran_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn shutdown_returns_only_after_tasks_are_gone() {
        let mut routes = InflightRoutes::new(4);
        let ctx = CancellationToken::new();
        let dropped = Arc::new(AtomicBool::new(false));
        let (started_tx, started_rx) = oneshot::channel();
        let flag = DropFlag(Arc::clone(&dropped));
        assert!(
            routes
                .spawn(&ctx, async move {
                    let _flag = flag;
                    let _ = started_tx.send(());
                    std::future::pending::<()>().await;
                })
                .await
        );
        started_rx.await.unwrap();
        assert!(!dropped.load(Ordering::SeqCst));

        routes.shutdown().await;
        assert!(dropped.load(Ordering::SeqCst));
    }
}

//! WebSocket client connection state.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tether_core::{CancellationToken, Connection, ConnectionError, EventMessage};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

/// Frame queued for the socket writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Serialized JSON text frame.
    Text(String),
    /// Heartbeat ping.
    Ping,
    /// Close frame; the writer stops after sending it.
    Close {
        /// RFC 6455 status code.
        code: u16,
        /// Close reason.
        reason: String,
    },
}

/// A connected WebSocket client.
///
/// Sends never touch the socket directly: frames go onto a bounded queue
/// drained by the session's writer task, so a slow peer surfaces as
/// [`ConnectionError::Full`] instead of stalling the sender.
pub struct WsConnection {
    id: String,
    ctx: CancellationToken,
    tx: mpsc::Sender<Outbound>,
    connected_at: Instant,
    is_alive: AtomicBool,
    last_seen: Mutex<Instant>,
    dropped: AtomicU64,
}

impl WsConnection {
    /// Create a connection whose context is a child of `parent`.
    pub fn new(id: String, tx: mpsc::Sender<Outbound>, parent: &CancellationToken) -> Self {
        let now = Instant::now();
        Self {
            id,
            ctx: parent.child_token(),
            tx,
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_seen: Mutex::new(now),
            dropped: AtomicU64::new(0),
        }
    }

    fn enqueue(&self, frame: Outbound) -> Result<(), ConnectionError> {
        if self.ctx.is_cancelled() {
            return Err(ConnectionError::Closed {
                id: self.id.clone(),
            });
        }
        self.tx.try_send(frame).map_err(|err| {
            let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
            match err {
                TrySendError::Full(_) => ConnectionError::Full {
                    id: self.id.clone(),
                },
                TrySendError::Closed(_) => ConnectionError::Closed {
                    id: self.id.clone(),
                },
            }
        })
    }

    /// Queue a heartbeat ping.
    pub fn ping(&self) -> Result<(), ConnectionError> {
        self.enqueue(Outbound::Ping)
    }

    /// Record inbound activity.
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_seen.lock() = Instant::now();
    }

    /// Check and reset the alive flag.
    ///
    /// Returns `true` if the client showed activity since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Time since the last inbound activity.
    pub fn idle_for(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Frames refused because the queue was full or closed.
    pub fn drop_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Cancel the connection context without sending a close frame.
    pub(crate) fn terminate(&self) {
        self.ctx.cancel();
    }
}

#[async_trait]
impl Connection for WsConnection {
    fn id(&self) -> &str {
        &self.id
    }

    fn context(&self) -> CancellationToken {
        self.ctx.clone()
    }

    async fn send_json(&self, value: &Value) -> Result<(), ConnectionError> {
        let text = serde_json::to_string(value)?;
        self.enqueue(Outbound::Text(text))
    }

    async fn emit_with_context(
        &self,
        ctx: &CancellationToken,
        event_type: &str,
        data: Value,
    ) -> Result<(), ConnectionError> {
        self.emit_event(ctx, &EventMessage::new(event_type, data))
            .await
    }

    /// Sends the whole envelope so namespace and ids reach the peer.
    async fn emit_event(
        &self,
        ctx: &CancellationToken,
        event: &EventMessage,
    ) -> Result<(), ConnectionError> {
        if ctx.is_cancelled() {
            debug!(
                conn_id = %self.id,
                event_type = %event.event_type,
                "caller cancelled, not sending"
            );
            return Err(ConnectionError::Closed {
                id: self.id.clone(),
            });
        }
        let mut event = event.clone();
        let _ = event.ensure_timestamp();
        let text = serde_json::to_string(&event)?;
        self.enqueue(Outbound::Text(text))
    }

    async fn close(&self, code: u16, reason: &str) -> Result<(), ConnectionError> {
        let queued = self.enqueue(Outbound::Close {
            code,
            reason: reason.to_owned(),
        });
        self.ctx.cancel();
        queued
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;
    use tether_core::connection::CLOSE_NORMAL;

    fn make_connection(capacity: usize) -> (WsConnection, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity);
        let conn = WsConnection::new("conn_1".into(), tx, &CancellationToken::new());
        (conn, rx)
    }

    fn text(frame: Outbound) -> Value {
        match frame {
            Outbound::Text(t) => serde_json::from_str(&t).unwrap(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn send_json_queues_text_frame() {
        let (conn, mut rx) = make_connection(8);
        conn.send_json(&json!({"key": "value"})).await.unwrap();
        assert_eq!(text(rx.recv().await.unwrap())["key"], "value");
    }

    #[tokio::test]
    async fn emit_event_sends_full_envelope() {
        let (conn, mut rx) = make_connection(8);
        let event = EventMessage::new("chat", json!({"text": "hi"}))
            .with_namespace("room")
            .with_id("evt_1");
        conn.emit_event(&CancellationToken::new(), &event)
            .await
            .unwrap();

        let sent = text(rx.recv().await.unwrap());
        assert_eq!(sent["type"], "chat");
        assert_eq!(sent["namespace"], "room");
        assert_eq!(sent["id"], "evt_1");
        assert!(sent["timestamp"].is_string());
    }

    #[tokio::test]
    async fn full_queue_reports_full_and_counts_drop() {
        let (conn, _rx) = make_connection(1);
        conn.send_json(&json!(1)).await.unwrap();
        assert_matches!(
            conn.send_json(&json!(2)).await,
            Err(ConnectionError::Full { .. })
        );
        assert_eq!(conn.drop_count(), 1);
    }

    #[tokio::test]
    async fn dropped_receiver_reports_closed() {
        let (conn, rx) = make_connection(8);
        drop(rx);
        assert_matches!(
            conn.send_json(&json!(1)).await,
            Err(ConnectionError::Closed { .. })
        );
    }

    #[tokio::test]
    async fn close_queues_frame_and_cancels_context() {
        let (conn, mut rx) = make_connection(8);
        let ctx = conn.context();
        conn.close(CLOSE_NORMAL, "bye").await.unwrap();

        assert!(ctx.is_cancelled());
        assert_eq!(
            rx.recv().await.unwrap(),
            Outbound::Close {
                code: CLOSE_NORMAL,
                reason: "bye".into()
            }
        );
        assert_matches!(
            conn.send_json(&json!(1)).await,
            Err(ConnectionError::Closed { .. })
        );
    }

    #[tokio::test]
    async fn cancelled_caller_context_refuses_emit() {
        let (conn, mut rx) = make_connection(8);
        let ctx = CancellationToken::new();
        ctx.cancel();
        assert!(conn.emit_with_context(&ctx, "x", json!(null)).await.is_err());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn context_is_child_of_parent() {
        let parent = CancellationToken::new();
        let (tx, _rx) = mpsc::channel(1);
        let conn = WsConnection::new("c".into(), tx, &parent);
        parent.cancel();
        assert!(conn.context().is_cancelled());
    }

    #[test]
    fn mark_alive_and_check() {
        let (conn, _rx) = make_connection(1);
        assert!(conn.check_alive());
        assert!(!conn.check_alive());
        conn.mark_alive();
        assert!(conn.check_alive());
        assert!(conn.idle_for() < Duration::from_secs(1));
    }
}

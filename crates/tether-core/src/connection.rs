//! The connection contract consumed by the dispatch core.
//!
//! Transports (WebSocket adapters, test doubles) implement [`Connection`].
//! The core never opens, upgrades or closes a transport on its own; it only
//! calls these primitives.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::event::EventMessage;

/// Normal closure (RFC 6455 §7.4.1).
pub const CLOSE_NORMAL: u16 = 1000;
/// Endpoint is going away (server shutdown).
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// Policy violation (e.g. failed authorization).
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;
/// Message too big to process.
pub const CLOSE_MESSAGE_TOO_BIG: u16 = 1009;

/// Failures reported by a connection's send primitives.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// The peer is gone or the connection was closed locally.
    #[error("connection '{id}' is closed")]
    Closed {
        /// Connection identity.
        id: String,
    },

    /// The outbound queue is full.
    #[error("send queue for connection '{id}' is full")]
    Full {
        /// Connection identity.
        id: String,
    },

    /// The outbound value could not be encoded.
    #[error("failed to encode outbound message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A live duplex connection to a peer.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Stable identity, unique among live connections.
    fn id(&self) -> &str;

    /// Per-connection context, cancelled when the connection ends.
    fn context(&self) -> CancellationToken;

    /// Send a raw JSON value to the peer.
    async fn send_json(&self, value: &Value) -> Result<(), ConnectionError>;

    /// Send an event of `event_type` carrying `data` to the peer.
    async fn emit_with_context(
        &self,
        ctx: &CancellationToken,
        event_type: &str,
        data: Value,
    ) -> Result<(), ConnectionError>;

    /// Close the connection with a status code and reason.
    async fn close(&self, code: u16, reason: &str) -> Result<(), ConnectionError>;

    /// Send a full event envelope to the peer.
    ///
    /// The default forwards the type and payload to
    /// [`emit_with_context`](Connection::emit_with_context); transports that
    /// can carry the whole envelope (namespace, ids) override it.
    async fn emit_event(
        &self,
        ctx: &CancellationToken,
        event: &EventMessage,
    ) -> Result<(), ConnectionError> {
        self.emit_with_context(ctx, &event.event_type, event.data.clone())
            .await
    }
}

/// Shared handle to a connection.
pub type ConnectionRef = Arc<dyn Connection>;

//! Connection lifecycle hooks and the funnel that invokes them.
//!
//! [`LifecycleFunnel`] is the only code that calls a [`LifecycleHooks`]
//! method. The upgrade handler and session loop go through the funnel, which
//! keeps each hook at one call site and makes every connection see at most
//! one `on_connect` and, after a successful connect, exactly one
//! `on_disconnect`.

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::HeaderMap;
use metrics::{counter, gauge, histogram};
use tether_core::metric_names::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL, WS_UPGRADES_REJECTED_TOTAL,
};
use tether_core::{Connection, ConnectionRef, EventError, Result};
use tracing::{info, warn};

use super::connection::WsConnection;
use super::registry::{ConnectionRegistry, RegistryError};

/// What the pre-upgrade hook can inspect.
#[derive(Clone, Debug, Default)]
pub struct UpgradeRequest {
    /// Request path.
    pub path: String,
    /// Raw query string, if any.
    pub query: Option<String>,
    /// Request headers.
    pub headers: HeaderMap,
}

impl UpgradeRequest {
    /// Value of a query parameter, if present.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.as_deref()?.split('&').find_map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (key == name).then_some(value)
        })
    }

    /// Header value as a string, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }
}

/// Application callbacks around a connection's life.
///
/// Every method has a permissive default.
#[async_trait]
pub trait LifecycleHooks: Send + Sync {
    /// Inspect the HTTP request before upgrading. An error refuses the
    /// upgrade.
    async fn on_pre_upgrade(&self, _request: &UpgradeRequest) -> Result<()> {
        Ok(())
    }

    /// The connection is registered and ready. An error closes it.
    async fn on_connect(&self, _conn: &ConnectionRef) -> Result<()> {
        Ok(())
    }

    /// The connection is gone.
    async fn on_disconnect(&self, _conn: &ConnectionRef) {}
}

/// Hooks that accept everything and observe nothing.
pub struct NoopHooks;

#[async_trait]
impl LifecycleHooks for NoopHooks {}

/// Why an upgrade was refused.
#[derive(Debug, thiserror::Error)]
pub enum UpgradeRejection {
    /// The server already holds `max_connections` connections.
    #[error("server at capacity ({max} connections)")]
    AtCapacity {
        /// Configured limit.
        max: usize,
    },
    /// The pre-upgrade hook refused the request.
    #[error(transparent)]
    Refused(EventError),
}

impl UpgradeRejection {
    fn reason(&self) -> &'static str {
        match self {
            Self::AtCapacity { .. } => "capacity",
            Self::Refused(_) => "refused",
        }
    }
}

/// Single invoker of [`LifecycleHooks`].
///
/// The connection limit is the registry's capacity. [`pre_upgrade`] refuses
/// early when it is reached and [`connect`] enforces it again atomically, so
/// upgrades racing past the first check still cannot exceed it.
///
/// [`pre_upgrade`]: Self::pre_upgrade
/// [`connect`]: Self::connect
pub struct LifecycleFunnel {
    hooks: Arc<dyn LifecycleHooks>,
    registry: Arc<ConnectionRegistry>,
}

impl LifecycleFunnel {
    /// Funnel registering connections in `registry`.
    pub fn new(hooks: Arc<dyn LifecycleHooks>, registry: Arc<ConnectionRegistry>) -> Self {
        Self { hooks, registry }
    }

    /// Decide whether an upgrade may proceed.
    pub async fn pre_upgrade(
        &self,
        request: &UpgradeRequest,
    ) -> std::result::Result<(), UpgradeRejection> {
        let result = if self.registry.is_full() {
            Err(UpgradeRejection::AtCapacity {
                max: self.registry.capacity(),
            })
        } else {
            self.hooks
                .on_pre_upgrade(request)
                .await
                .map_err(UpgradeRejection::Refused)
        };
        if let Err(rejection) = &result {
            counter!(WS_UPGRADES_REJECTED_TOTAL, "reason" => rejection.reason()).increment(1);
            warn!(path = %request.path, error = %rejection, "upgrade rejected");
        }
        result
    }

    /// Register a freshly upgraded connection and run `on_connect`.
    ///
    /// A duplicate id or a full registry fails before `on_connect`. On a
    /// hook error the connection is unregistered again. In every failure
    /// case `on_disconnect` will not run for it.
    pub async fn connect(&self, conn: &Arc<WsConnection>) -> Result<()> {
        match self.registry.add(Arc::clone(conn)) {
            Ok(()) => {}
            Err(err @ RegistryError::Duplicate(_)) => {
                return Err(EventError::invalid_argument(err.to_string()));
            }
            Err(err @ RegistryError::Full { .. }) => {
                counter!(WS_UPGRADES_REJECTED_TOTAL, "reason" => "capacity").increment(1);
                warn!(conn_id = conn.id(), error = %err, "connection refused");
                return Err(EventError::handler(err.to_string()));
            }
        }
        let conn_ref: ConnectionRef = conn.clone();
        if let Err(err) = self.hooks.on_connect(&conn_ref).await {
            let _ = self.registry.remove(conn.id());
            warn!(conn_id = conn.id(), error = %err, "connect hook refused connection");
            return Err(err);
        }
        counter!(WS_CONNECTIONS_TOTAL).increment(1);
        gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
        info!(conn_id = conn.id(), "client connected");
        Ok(())
    }

    /// Unregister a connection and run `on_disconnect` if this call removed
    /// it. Returns whether the hook ran.
    pub async fn disconnect(&self, conn: &Arc<WsConnection>) -> bool {
        if self.registry.remove(conn.id()).is_none() {
            return false;
        }
        let conn_ref: ConnectionRef = conn.clone();
        self.hooks.on_disconnect(&conn_ref).await;
        counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
        gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
        histogram!(WS_CONNECTION_DURATION_SECONDS).record(conn.age().as_secs_f64());
        info!(conn_id = conn.id(), "client disconnected");
        true
    }

    /// The registry this funnel maintains.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }
}

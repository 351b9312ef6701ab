//! Top-level event dispatcher.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tether_core::{CancellationToken, ConnectionRef, EventMessage, Result};
use tracing::{debug, instrument};

use crate::handler::{FnHandler, HandlerRef, TypedHandler};
use crate::history::{EventHistory, HistoryConfig, HistoryFilter};
use crate::middleware::{Dispatch, MiddlewareRef, Next};
use crate::namespace::EventNamespace;
use crate::table::HandlerTable;

/// Router options.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Run each handler's `validate` before `handle`.
    pub validate: bool,
    /// Record routed events. `None` disables history.
    pub history: Option<HistoryConfig>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            validate: true,
            history: None,
        }
    }
}

/// Routes inbound events through middleware to global or namespaced handlers.
///
/// Cloning is cheap; clones share all state. There is no process-wide
/// instance: create one per server (or per test).
#[derive(Clone)]
pub struct EventRouter {
    inner: Arc<RouterInner>,
}

struct RouterInner {
    validate: bool,
    global: Arc<HandlerTable>,
    middleware: RwLock<Vec<MiddlewareRef>>,
    namespaces: RwLock<HashMap<String, EventNamespace>>,
    history: Option<EventHistory>,
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl EventRouter {
    /// Router with validation on and history off.
    pub fn new() -> Self {
        Self::with_config(RouterConfig::default())
    }

    /// Router with explicit options.
    pub fn with_config(config: RouterConfig) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                validate: config.validate,
                global: Arc::new(HandlerTable::new("global", config.validate)),
                middleware: RwLock::new(Vec::new()),
                namespaces: RwLock::new(HashMap::new()),
                history: config.history.map(EventHistory::new),
            }),
        }
    }

    // ── Handlers ────────────────────────────────────────────────────

    /// Register a global handler. Every handler for a type runs, in
    /// registration order.
    pub fn on(&self, event_type: &str, handler: HandlerRef) -> Result<()> {
        self.inner.global.register(event_type, handler)
    }

    /// Register an async function over the raw event.
    pub fn on_fn<F, Fut>(&self, event_type: &str, func: F) -> Result<()>
    where
        F: Fn(CancellationToken, ConnectionRef, EventMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.on(event_type, Arc::new(FnHandler::new(event_type, func)))
    }

    /// Register an async function receiving the payload as `T`.
    pub fn on_typed<T, F, Fut>(&self, event_type: &str, func: F) -> Result<()>
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(CancellationToken, ConnectionRef, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.on(event_type, Arc::new(TypedHandler::new(event_type, func)))
    }

    /// Remove every global handler for `event_type`.
    pub fn off(&self, event_type: &str) -> usize {
        self.inner.global.remove(event_type)
    }

    /// Number of global handlers for `event_type`.
    pub fn handler_count(&self, event_type: &str) -> usize {
        self.inner.global.count(event_type)
    }

    /// Event types with at least one global handler, sorted.
    pub fn event_types(&self) -> Vec<String> {
        self.inner.global.event_types()
    }

    /// Append a global middleware. The first registered runs outermost.
    pub fn use_middleware(&self, middleware: MiddlewareRef) {
        self.inner.middleware.write().push(middleware);
    }

    // ── Namespaces ──────────────────────────────────────────────────

    /// Get or create the namespace `name`.
    pub fn namespace(&self, name: &str) -> EventNamespace {
        if let Some(ns) = self.inner.namespaces.read().get(name) {
            return ns.clone();
        }
        self.inner
            .namespaces
            .write()
            .entry(name.to_owned())
            .or_insert_with(|| {
                debug!(namespace = name, "namespace created");
                EventNamespace::new(name, self.inner.validate, Arc::clone(&self.inner.global))
            })
            .clone()
    }

    /// Look up a namespace without creating it.
    pub fn get_namespace(&self, name: &str) -> Option<EventNamespace> {
        self.inner.namespaces.read().get(name).cloned()
    }

    /// Names of every namespace created so far, sorted.
    pub fn namespace_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.namespaces.read().keys().cloned().collect();
        names.sort();
        names
    }

    // ── Routing ─────────────────────────────────────────────────────

    /// Entry point for every decoded inbound event.
    ///
    /// Stamps the event if it has no timestamp (or a zero one), records it
    /// when history is on, then runs the global middleware chain. The chain
    /// ends in namespace dispatch when the event names a known namespace and
    /// in global dispatch otherwise.
    #[instrument(skip_all, fields(event_type = %event.event_type, conn_id = conn.id()))]
    pub async fn route_event(
        &self,
        ctx: &CancellationToken,
        conn: &ConnectionRef,
        event: &mut EventMessage,
    ) -> Result<()> {
        let _ = event.ensure_timestamp();
        if let Some(history) = &self.inner.history {
            history.record(event);
        }

        let chain = self.inner.middleware.read().clone();
        let terminal = RouterTerminal { inner: &self.inner };
        Next::new(&chain, &terminal).run(ctx, conn, event).await
    }

    // ── History ─────────────────────────────────────────────────────

    /// Recorded events matching `filter`, oldest first. Empty when history
    /// is off.
    pub fn history(&self, filter: &HistoryFilter) -> Vec<EventMessage> {
        self.inner
            .history
            .as_ref()
            .map(|history| history.snapshot(filter))
            .unwrap_or_default()
    }

    /// Drop every recorded event.
    pub fn clear_history(&self) {
        if let Some(history) = &self.inner.history {
            history.clear();
        }
    }
}

struct RouterTerminal<'a> {
    inner: &'a RouterInner,
}

#[async_trait]
impl Dispatch for RouterTerminal<'_> {
    async fn dispatch(
        &self,
        ctx: &CancellationToken,
        conn: &ConnectionRef,
        event: &EventMessage,
    ) -> Result<()> {
        if let Some(name) = event.namespace() {
            let namespace = self.inner.namespaces.read().get(name).cloned();
            match namespace {
                Some(namespace) => return namespace.dispatch(ctx, conn, event).await,
                None => debug!(namespace = name, "unknown namespace, dispatching globally"),
            }
        }
        self.inner.global.dispatch(ctx, conn, event).await
    }
}

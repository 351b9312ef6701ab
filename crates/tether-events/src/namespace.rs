//! Named, isolated handler scopes with their own middleware and membership.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use tether_core::{
    CancellationToken, Connection, ConnectionRef, EventError, EventMessage, Result,
};
use tracing::{debug, info, warn};

use crate::auth::{AuthorizerRef, FnAuthorizer};
use crate::handler::{FnHandler, HandlerRef, TypedHandler};
use crate::middleware::{Dispatch, MiddlewareRef, Next};
use crate::table::HandlerTable;

/// A namespace obtained from [`EventRouter::namespace`](crate::EventRouter::namespace).
///
/// Cloning is cheap; clones share the same handlers, middleware and members.
#[derive(Clone)]
pub struct EventNamespace {
    inner: Arc<NamespaceInner>,
}

struct NamespaceInner {
    name: String,
    handlers: HandlerTable,
    middleware: RwLock<Vec<MiddlewareRef>>,
    auth: RwLock<Option<AuthorizerRef>>,
    members: RwLock<HashMap<String, ConnectionRef>>,
    global: Arc<HandlerTable>,
}

impl EventNamespace {
    pub(crate) fn new(name: &str, validate: bool, global: Arc<HandlerTable>) -> Self {
        Self {
            inner: Arc::new(NamespaceInner {
                name: name.to_owned(),
                handlers: HandlerTable::new(format!("namespace:{name}"), validate),
                middleware: RwLock::new(Vec::new()),
                auth: RwLock::new(None),
                members: RwLock::new(HashMap::new()),
                global,
            }),
        }
    }

    /// Namespace name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    // ── Handlers ────────────────────────────────────────────────────

    /// Register a handler for `event_type` within this namespace.
    pub fn on(&self, event_type: &str, handler: HandlerRef) -> Result<()> {
        self.inner.handlers.register(event_type, handler)
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

    /// Remove every handler for `event_type`; events of that type fall back
    /// to global handlers afterwards.
    pub fn off(&self, event_type: &str) -> usize {
        self.inner.handlers.remove(event_type)
    }

    /// Number of namespace-level handlers for `event_type`.
    pub fn handler_count(&self, event_type: &str) -> usize {
        self.inner.handlers.count(event_type)
    }

    /// Append a middleware to this namespace's chain.
    pub fn use_middleware(&self, middleware: MiddlewareRef) {
        self.inner.middleware.write().push(middleware);
    }

    // ── Membership ──────────────────────────────────────────────────

    /// Require `authorizer` to admit connections on [`join`](Self::join).
    pub fn set_auth(&self, authorizer: AuthorizerRef) {
        *self.inner.auth.write() = Some(authorizer);
    }

    /// [`set_auth`](Self::set_auth) with a synchronous predicate.
    pub fn set_auth_fn<F>(&self, predicate: F)
    where
        F: Fn(&dyn Connection) -> bool + Send + Sync + 'static,
    {
        self.set_auth(Arc::new(FnAuthorizer::new(predicate)));
    }

    /// Add `conn` to the members after authorization.
    ///
    /// A refused connection is not added and the authorization error is
    /// returned. Joining twice is harmless.
    pub async fn join(&self, ctx: &CancellationToken, conn: &ConnectionRef) -> Result<()> {
        let auth = self.inner.auth.read().clone();
        if let Some(auth) = auth {
            if let Err(err) = auth.authorize(ctx, conn).await {
                warn!(
                    namespace = %self.inner.name,
                    conn_id = conn.id(),
                    error = %err,
                    "join refused"
                );
                return Err(err);
            }
        }
        let _ = self
            .inner
            .members
            .write()
            .insert(conn.id().to_owned(), Arc::clone(conn));
        info!(namespace = %self.inner.name, conn_id = conn.id(), "connection joined");
        Ok(())
    }

    /// Remove the member with `conn_id`. Returns whether it was a member.
    pub fn leave(&self, conn_id: &str) -> bool {
        let removed = self.inner.members.write().remove(conn_id).is_some();
        if removed {
            info!(namespace = %self.inner.name, conn_id, "connection left");
        }
        removed
    }

    /// Whether `conn_id` is a member.
    pub fn is_member(&self, conn_id: &str) -> bool {
        self.inner.members.read().contains_key(conn_id)
    }

    /// Snapshot of current members.
    pub fn members(&self) -> Vec<ConnectionRef> {
        self.inner.members.read().values().cloned().collect()
    }

    /// Number of members.
    pub fn member_count(&self) -> usize {
        self.inner.members.read().len()
    }

    // ── Emit / dispatch ─────────────────────────────────────────────

    /// Send `event`, stamped with this namespace, to every member.
    ///
    /// Delivery is attempted to all members; the last failure is returned.
    pub async fn emit(&self, ctx: &CancellationToken, mut event: EventMessage) -> Result<()> {
        event.namespace = Some(self.inner.name.clone());
        let _ = event.ensure_timestamp();

        let mut last_error = None;
        for member in self.members() {
            if let Err(err) = member.emit_event(ctx, &event).await {
                warn!(
                    namespace = %self.inner.name,
                    conn_id = member.id(),
                    event_type = %event.event_type,
                    error = %err,
                    "namespace emit failed"
                );
                last_error = Some(EventError::from(err));
            }
        }
        last_error.map_or(Ok(()), Err)
    }

    /// Run the namespace chain for `event`.
    pub(crate) async fn dispatch(
        &self,
        ctx: &CancellationToken,
        conn: &ConnectionRef,
        event: &EventMessage,
    ) -> Result<()> {
        let chain = self.inner.middleware.read().clone();
        let terminal = NamespaceTerminal { inner: &self.inner };
        Next::new(&chain, &terminal).run(ctx, conn, event).await
    }
}

struct NamespaceTerminal<'a> {
    inner: &'a NamespaceInner,
}

#[async_trait]
impl Dispatch for NamespaceTerminal<'_> {
    async fn dispatch(
        &self,
        ctx: &CancellationToken,
        conn: &ConnectionRef,
        event: &EventMessage,
    ) -> Result<()> {
        if self.inner.handlers.has(&event.event_type) {
            self.inner.handlers.dispatch(ctx, conn, event).await
        } else {
            debug!(
                namespace = %self.inner.name,
                event_type = %event.event_type,
                "no namespace handler, falling back to global"
            );
            self.inner.global.dispatch(ctx, conn, event).await
        }
    }
}

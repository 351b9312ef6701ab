//! Handler table shared by the router (global scope) and namespaces.

use std::collections::HashMap;

use parking_lot::RwLock;
use tether_core::{CancellationToken, ConnectionRef, EventError, EventMessage, Result};
use tracing::{debug, warn};

use crate::handler::HandlerRef;

/// Maps event types to their handlers, in registration order.
pub(crate) struct HandlerTable {
    scope: String,
    validate: bool,
    handlers: RwLock<HashMap<String, Vec<HandlerRef>>>,
}

impl HandlerTable {
    pub(crate) fn new(scope: impl Into<String>, validate: bool) -> Self {
        Self {
            scope: scope.into(),
            validate,
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Append a handler for `event_type`.
    pub(crate) fn register(&self, event_type: &str, handler: HandlerRef) -> Result<()> {
        if event_type.is_empty() {
            return Err(EventError::invalid_argument(
                "event type must not be empty",
            ));
        }
        let declared = handler.event_type();
        if !declared.is_empty() && declared != event_type {
            return Err(EventError::invalid_argument(format!(
                "handler for '{declared}' cannot be registered under '{event_type}'"
            )));
        }
        self.handlers
            .write()
            .entry(event_type.to_owned())
            .or_default()
            .push(handler);
        debug!(scope = %self.scope, event_type, "handler registered");
        Ok(())
    }

    /// Remove every handler for `event_type`, returning how many were removed.
    pub(crate) fn remove(&self, event_type: &str) -> usize {
        self.handlers
            .write()
            .remove(event_type)
            .map_or(0, |removed| removed.len())
    }

    pub(crate) fn has(&self, event_type: &str) -> bool {
        self.handlers
            .read()
            .get(event_type)
            .is_some_and(|list| !list.is_empty())
    }

    pub(crate) fn count(&self, event_type: &str) -> usize {
        self.handlers.read().get(event_type).map_or(0, Vec::len)
    }

    /// Registered event types (sorted).
    pub(crate) fn event_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.read().keys().cloned().collect();
        types.sort();
        types
    }

    fn snapshot(&self, event_type: &str) -> Vec<HandlerRef> {
        self.handlers
            .read()
            .get(event_type)
            .cloned()
            .unwrap_or_default()
    }

    /// Run every handler registered for the event's type.
    ///
    /// Handlers failing validation are skipped; every other handler runs even
    /// if an earlier one failed. The returned error is the one recorded last,
    /// whichever handler produced it.
    pub(crate) async fn dispatch(
        &self,
        ctx: &CancellationToken,
        conn: &ConnectionRef,
        event: &EventMessage,
    ) -> Result<()> {
        let handlers = self.snapshot(&event.event_type);
        if handlers.is_empty() {
            debug!(scope = %self.scope, event_type = %event.event_type, "no handlers registered");
            return Ok(());
        }

        let mut last_error = None;
        for handler in handlers {
            if self.validate {
                if let Err(err) = handler.validate(&event.data) {
                    warn!(
                        scope = %self.scope,
                        event_type = %event.event_type,
                        conn_id = conn.id(),
                        error = %err,
                        "payload rejected by handler validation"
                    );
                    last_error = Some(err);
                    continue;
                }
            }
            if let Err(err) = handler.handle(ctx, conn, event).await {
                warn!(
                    scope = %self.scope,
                    event_type = %event.event_type,
                    conn_id = conn.id(),
                    error = %err,
                    "event handler failed"
                );
                last_error = Some(err);
            }
        }

        last_error.map_or(Ok(()), Err)
    }
}

//! Middleware pipeline.
//!
//! A chain is an ordered slice of [`EventMiddleware`] ending in a terminal
//! [`Dispatch`]. [`Next`] is a cursor over the remaining slice: calling
//! [`Next::run`] invokes the next middleware, or the terminal once the slice
//! is exhausted. A middleware that returns without running `next`
//! short-circuits everything after it.
//!
//! Chains are assembled per call from a snapshot of the registered
//! middleware, so registration while events are in flight never affects an
//! event that is already being dispatched.

mod auth;
mod logging;
mod metrics;
mod recovery;
mod timeout;

use std::sync::Arc;

use async_trait::async_trait;
use tether_core::{CancellationToken, ConnectionRef, EventMessage, Result};

pub use self::auth::AuthMiddleware;
pub use self::logging::LoggingMiddleware;
pub use self::metrics::MetricsMiddleware;
pub use self::recovery::RecoveryMiddleware;
pub use self::timeout::TimeoutMiddleware;

/// A stage in the dispatch pipeline.
#[async_trait]
pub trait EventMiddleware: Send + Sync {
    /// Process `event`, calling `next.run(..)` to continue the chain.
    async fn handle(
        &self,
        ctx: &CancellationToken,
        conn: &ConnectionRef,
        event: &EventMessage,
        next: Next<'_>,
    ) -> Result<()>;
}

/// Shared handle to a middleware.
pub type MiddlewareRef = Arc<dyn EventMiddleware>;

/// The step a chain ends in once every middleware has run.
#[async_trait]
pub trait Dispatch: Send + Sync {
    /// Deliver the event to its handlers.
    async fn dispatch(
        &self,
        ctx: &CancellationToken,
        conn: &ConnectionRef,
        event: &EventMessage,
    ) -> Result<()>;
}

/// Remainder of a middleware chain.
pub struct Next<'a> {
    remaining: &'a [MiddlewareRef],
    terminal: &'a dyn Dispatch,
}

impl<'a> Next<'a> {
    /// Chain running `middleware` in order, then `terminal`.
    pub fn new(middleware: &'a [MiddlewareRef], terminal: &'a dyn Dispatch) -> Self {
        Self {
            remaining: middleware,
            terminal,
        }
    }

    /// Continue the chain.
    pub async fn run(
        self,
        ctx: &CancellationToken,
        conn: &ConnectionRef,
        event: &EventMessage,
    ) -> Result<()> {
        match self.remaining.split_first() {
            Some((current, rest)) => {
                let next = Next {
                    remaining: rest,
                    terminal: self.terminal,
                };
                current.handle(ctx, conn, event, next).await
            }
            None => self.terminal.dispatch(ctx, conn, event).await,
        }
    }

    /// Middleware left before the terminal.
    pub fn remaining(&self) -> usize {
        self.remaining.len()
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::Value;
    use tether_core::testing::RecordingConnection;

    /// Terminal that records that it ran.
    #[derive(Default)]
    pub(crate) struct FlagTerminal {
        pub(crate) hits: Mutex<usize>,
    }

    #[async_trait]
    impl Dispatch for FlagTerminal {
        async fn dispatch(
            &self,
            _ctx: &CancellationToken,
            _conn: &ConnectionRef,
            _event: &EventMessage,
        ) -> Result<()> {
            *self.hits.lock() += 1;
            Ok(())
        }
    }

    struct Tag {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        forward: bool,
    }

    #[async_trait]
    impl EventMiddleware for Tag {
        async fn handle(
            &self,
            ctx: &CancellationToken,
            conn: &ConnectionRef,
            event: &EventMessage,
            next: Next<'_>,
        ) -> Result<()> {
            self.log.lock().push(format!("{}:before", self.name));
            if !self.forward {
                return Ok(());
            }
            let result = next.run(ctx, conn, event).await;
            self.log.lock().push(format!("{}:after", self.name));
            result
        }
    }

    fn tag(name: &'static str, log: &Arc<Mutex<Vec<String>>>, forward: bool) -> MiddlewareRef {
        Arc::new(Tag {
            name,
            log: log.clone(),
            forward,
        })
    }

    #[tokio::test]
    async fn runs_in_registration_order_outermost_first() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = vec![tag("a", &log, true), tag("b", &log, true)];
        let terminal = FlagTerminal::default();
        let conn = RecordingConnection::new("c").into_ref();

        Next::new(&chain, &terminal)
            .run(&CancellationToken::new(), &conn, &EventMessage::new("x", Value::Null))
            .await
            .unwrap();

        assert_eq!(*log.lock(), vec!["a:before", "b:before", "b:after", "a:after"]);
        assert_eq!(*terminal.hits.lock(), 1);
    }

    #[tokio::test]
    async fn middleware_not_calling_next_short_circuits() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = vec![tag("stop", &log, false), tag("never", &log, true)];
        let terminal = FlagTerminal::default();
        let conn = RecordingConnection::new("c").into_ref();

        Next::new(&chain, &terminal)
            .run(&CancellationToken::new(), &conn, &EventMessage::new("x", Value::Null))
            .await
            .unwrap();

        assert_eq!(*log.lock(), vec!["stop:before"]);
        assert_eq!(*terminal.hits.lock(), 0);
    }

    #[tokio::test]
    async fn empty_chain_goes_straight_to_terminal() {
        let terminal = FlagTerminal::default();
        let conn = RecordingConnection::new("c").into_ref();
        let next = Next::new(&[], &terminal);
        assert_eq!(next.remaining(), 0);
        next.run(&CancellationToken::new(), &conn, &EventMessage::new("x", Value::Null))
            .await
            .unwrap();
        assert_eq!(*terminal.hits.lock(), 1);
    }
}

//! Authorization callbacks for namespace membership and the auth middleware.

use std::sync::Arc;

use async_trait::async_trait;
use tether_core::{CancellationToken, Connection, ConnectionRef, EventError, Result};

/// Decides whether a connection may proceed.
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// `Ok(())` to allow, an [`EventError::Unauthorized`] to refuse.
    async fn authorize(&self, ctx: &CancellationToken, conn: &ConnectionRef) -> Result<()>;
}

/// Shared handle to an authorizer.
pub type AuthorizerRef = Arc<dyn Authorizer>;

/// Authorizer backed by a synchronous predicate.
pub struct FnAuthorizer<F> {
    predicate: F,
}

impl<F> FnAuthorizer<F>
where
    F: Fn(&dyn Connection) -> bool + Send + Sync + 'static,
{
    /// Allow connections for which `predicate` returns `true`.
    pub fn new(predicate: F) -> Self {
        Self { predicate }
    }
}

#[async_trait]
impl<F> Authorizer for FnAuthorizer<F>
where
    F: Fn(&dyn Connection) -> bool + Send + Sync + 'static,
{
    async fn authorize(&self, _ctx: &CancellationToken, conn: &ConnectionRef) -> Result<()> {
        if (self.predicate)(conn.as_ref()) {
            Ok(())
        } else {
            Err(EventError::unauthorized(format!(
                "connection '{}' is not allowed",
                conn.id()
            )))
        }
    }
}

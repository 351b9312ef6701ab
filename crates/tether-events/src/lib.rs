//! # tether-events
//!
//! Event dispatch for tether:
//!
//! - [`EventRouter`]: global handlers, global middleware, namespace registry,
//!   optional bounded history
//! - [`EventNamespace`]: scoped handlers and middleware with membership and
//!   fallback to global handlers
//! - [`TypedEventHandler`]: raw ([`FnHandler`]) and typed ([`TypedHandler`])
//!   handlers
//! - [`middleware`]: the chain plus stock logging, recovery, timeout, auth and
//!   metrics stages
//!
//! Dispatch runs every handler registered for a type, skipping those whose
//! validation fails, and reports the error recorded last.

#![deny(unsafe_code)]

pub mod auth;
pub mod handler;
pub mod history;
pub mod middleware;
pub mod namespace;
pub mod router;
mod table;

pub use auth::{Authorizer, AuthorizerRef, FnAuthorizer};
pub use handler::{FnHandler, HandlerRef, TypedEventHandler, TypedHandler, coerce};
pub use history::{HistoryConfig, HistoryFilter};
pub use middleware::{Dispatch, EventMiddleware, MiddlewareRef, Next};
pub use namespace::EventNamespace;
pub use router::{EventRouter, RouterConfig};

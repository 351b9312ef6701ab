//! # tether-core
//!
//! Shared vocabulary for the tether event layer:
//!
//! - **Wire types**: [`EventMessage`] and [`EventAck`] with their JSON shape
//! - **Connection contract**: the [`Connection`] trait transports implement
//! - **Errors**: [`EventError`] with machine-readable codes
//! - **Ids**: prefixed UUID v7 generators
//! - **Logging**: `tracing` subscriber setup

#![deny(unsafe_code)]

pub mod connection;
pub mod errors;
pub mod event;
pub mod ids;
pub mod logging;
pub mod metric_names;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use connection::{Connection, ConnectionError, ConnectionRef};
pub use errors::{ErrorBody, EventError, Result};
pub use event::{ACK_EVENT_TYPE, ACK_TIMEOUT_ERROR, ERROR_EVENT_TYPE, EventAck, EventMessage};
pub use tokio_util::sync::CancellationToken;

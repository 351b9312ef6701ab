//! # tether-server
//!
//! Axum WebSocket adapter for the tether event router.
//!
//! - `GET /ws`: upgrade through the lifecycle funnel, then a session loop
//!   decoding frames into events for [`EventRouter::route_event`]
//! - `GET /health`, `GET /metrics`
//! - Heartbeat pings with dead-client detection
//! - Graceful shutdown via `CancellationToken`
//!
//! [`EventRouter::route_event`]: tether_events::EventRouter::route_event

#![deny(unsafe_code)]

pub mod config;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use server::TetherServer;
pub use shutdown::ShutdownCoordinator;
pub use websocket::connection::WsConnection;
pub use websocket::lifecycle::{LifecycleHooks, NoopHooks, UpgradeRejection, UpgradeRequest};
pub use websocket::registry::{ConnectionRegistry, RegistryError};

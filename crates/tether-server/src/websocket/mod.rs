//! WebSocket connection management, lifecycle funnel, heartbeat and the
//! per-client session loop.

pub mod connection;
pub mod heartbeat;
pub mod lifecycle;
pub mod registry;
pub(crate) mod session;

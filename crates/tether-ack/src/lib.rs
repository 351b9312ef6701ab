//! # tether-ack
//!
//! Reliable request/acknowledge delivery on top of fire-and-forget events.
//!
//! - [`AckManager`]: registers a pending entry before sending, resolves it
//!   exactly once by ack, timeout or cancellation
//! - [`AckMiddleware`]: routes inbound `"ack"` events to the manager
//! - [`AckBatcher`]: groups resolved acks for downstream flushing

#![deny(unsafe_code)]

pub mod batcher;
pub mod manager;
pub mod middleware;

pub use batcher::{AckBatcher, FlushFn};
pub use manager::{AckCallback, AckManager, DEFAULT_ACK_TIMEOUT};
pub use middleware::AckMiddleware;

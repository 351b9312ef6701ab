//! Identifier generation.
//!
//! All ids are prefixed UUID v7 strings, so they sort by creation time.

use uuid::Uuid;

/// New acknowledgment correlation id (`ack_<uuid-v7>`).
pub fn new_ack_id() -> String {
    format!("ack_{}", Uuid::now_v7())
}

/// New event id (`evt_<uuid-v7>`).
pub fn new_event_id() -> String {
    format!("evt_{}", Uuid::now_v7())
}

/// New connection id (`conn_<uuid-v7>`).
pub fn new_connection_id() -> String {
    format!("conn_{}", Uuid::now_v7())
}

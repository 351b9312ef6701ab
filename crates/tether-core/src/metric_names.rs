//! Metric name constants shared across crates to avoid typos.

/// Events entering the router (counter, labels: type).
pub const EVENTS_ROUTED_TOTAL: &str = "events_routed_total";
/// Dispatch duration (histogram, labels: type).
pub const EVENT_DISPATCH_DURATION_SECONDS: &str = "event_dispatch_duration_seconds";
/// Failed dispatches (counter, labels: type, error_type).
pub const EVENT_ERRORS_TOTAL: &str = "event_errors_total";
/// Acknowledgments currently awaited (gauge).
pub const ACKS_PENDING: &str = "acks_pending";
/// Resolved acknowledgments (counter, labels: outcome = acked, timeout, cancelled, send_failed).
pub const ACKS_RESOLVED_TOTAL: &str = "acks_resolved_total";
/// Batches handed to the ack flush callback (counter).
pub const ACK_BATCHES_FLUSHED_TOTAL: &str = "ack_batches_flushed_total";
/// WebSocket connections opened (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// WebSocket connection lifetime (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Upgrades refused by the pre-upgrade hook (counter).
pub const WS_UPGRADES_REJECTED_TOTAL: &str = "ws_upgrades_rejected_total";

/// Every metric name, for exporters and tests.
pub const ALL: &[&str] = &[
    EVENTS_ROUTED_TOTAL,
    EVENT_DISPATCH_DURATION_SECONDS,
    EVENT_ERRORS_TOTAL,
    ACKS_PENDING,
    ACKS_RESOLVED_TOTAL,
    ACK_BATCHES_FLUSHED_TOTAL,
    WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL,
    WS_CONNECTIONS_ACTIVE,
    WS_CONNECTION_DURATION_SECONDS,
    WS_UPGRADES_REJECTED_TOTAL,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_names_are_snake_case() {
        for name in ALL {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{name}' must be snake_case"
            );
        }
    }
}

//! Dispatch, acknowledgment and batching settings.

use serde::{Deserialize, Serialize};

/// Router behavior.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RouterSettings {
    /// Run handler validation before dispatch.
    pub validate_events: bool,
    /// Events kept in history; `0` disables history.
    pub history_size: usize,
    /// History entry lifetime in seconds; `0` keeps entries until evicted.
    pub history_ttl_secs: u64,
    /// Namespaces created at startup. Clients can join only these.
    pub namespaces: Vec<String>,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            validate_events: true,
            history_size: 1000,
            history_ttl_secs: 3600,
            namespaces: Vec::new(),
        }
    }
}

/// Acknowledgment manager settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AckSettings {
    /// Default acknowledgment timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for AckSettings {
    fn default() -> Self {
        Self { timeout_ms: 30_000 }
    }
}

/// Ack batcher thresholds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BatcherSettings {
    /// Flush once this many acks are queued.
    pub max_size: usize,
    /// Flush this long after the first queued ack, in milliseconds.
    pub interval_ms: u64,
}

impl Default for BatcherSettings {
    fn default() -> Self {
        Self {
            max_size: 100,
            interval_ms: 1000,
        }
    }
}

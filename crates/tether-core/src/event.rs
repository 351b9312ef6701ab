//! Wire envelope types: [`EventMessage`] and its acknowledgment [`EventAck`].
//!
//! JSON shape (field names are part of the wire contract):
//!
//! ```text
//! EventMessage: { id?, type, namespace?, data?, metadata?, timestamp, ack_id? }
//! EventAck:     { id, success, data?, error?, timestamp }
//! ```

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event type carrying an [`EventAck`] in its `data` field.
pub const ACK_EVENT_TYPE: &str = "ack";

/// Event type adapters use to report failures back to a peer.
pub const ERROR_EVENT_TYPE: &str = "error";

/// Error text of the acknowledgment synthesized when a peer never replies.
pub const ACK_TIMEOUT_ERROR: &str = "acknowledgment timeout";

/// Seconds from the Unix epoch to `0001-01-01T00:00:00Z`, the zero time some
/// peers send instead of omitting the field.
const ZERO_TIME_SECS: i64 = -62_135_596_800;

/// Whether `ts` is a zero-time placeholder rather than a real instant.
fn is_zero_time(ts: &DateTime<Utc>) -> bool {
    *ts == DateTime::<Utc>::MIN_UTC
        || (ts.timestamp() == ZERO_TIME_SECS && ts.timestamp_subsec_nanos() == 0)
}

/// A typed, optionally namespaced, optionally ack-correlated message.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EventMessage {
    /// Producer-assigned identifier (opaque).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Dispatch key.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Namespace scope. `None` or empty means global.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Opaque payload.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
    /// String-keyed side channel.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
    /// Set by the router when absent or zero.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// Correlation id. `None` or empty means no acknowledgment is expected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack_id: Option<String>,
}

impl EventMessage {
    /// Create an event of the given type carrying `data`.
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            ..Self::default()
        }
    }

    /// Build an `"ack"` event wrapping `ack`.
    pub fn ack(ack: &EventAck) -> Result<Self, serde_json::Error> {
        Ok(Self::new(ACK_EVENT_TYPE, serde_json::to_value(ack)?))
    }

    /// Attach a producer id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Scope the event to a namespace.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Request an acknowledgment correlated by `ack_id`.
    #[must_use]
    pub fn with_ack_id(mut self, ack_id: impl Into<String>) -> Self {
        self.ack_id = Some(ack_id.into());
        self
    }

    /// Add a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self.metadata.insert(key.into(), value.into());
        self
    }

    /// Namespace name, treating an empty string as global.
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref().filter(|ns| !ns.is_empty())
    }

    /// Correlation id, treating an empty string as absent.
    pub fn ack_id(&self) -> Option<&str> {
        self.ack_id.as_deref().filter(|id| !id.is_empty())
    }

    /// Whether the producer expects an acknowledgment.
    pub fn expects_ack(&self) -> bool {
        self.ack_id().is_some()
    }

    /// Whether this event carries an acknowledgment.
    pub fn is_ack(&self) -> bool {
        self.event_type == ACK_EVENT_TYPE
    }

    /// Stamp the current time if no timestamp is set (or it is the zero
    /// time), returning the timestamp.
    pub fn ensure_timestamp(&mut self) -> DateTime<Utc> {
        if self.timestamp.as_ref().is_some_and(is_zero_time) {
            self.timestamp = None;
        }
        *self.timestamp.get_or_insert_with(Utc::now)
    }
}

/// Correlated reply to an event that carried an `ack_id`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventAck {
    /// Must equal the originating event's `ack_id`.
    pub id: String,
    /// Whether the peer processed the event successfully.
    pub success: bool,
    /// Opaque result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Human-readable failure reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the ack was produced.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl EventAck {
    /// Successful acknowledgment with an optional result.
    pub fn success(id: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            id: id.into(),
            success: true,
            data,
            error: None,
            timestamp: Utc::now(),
        }
    }

    /// Failed acknowledgment with a reason.
    pub fn failure(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            success: false,
            data: None,
            error: Some(error.into()),
            timestamp: Utc::now(),
        }
    }

    /// Acknowledgment synthesized when the deadline passes without a reply.
    pub fn timed_out(id: impl Into<String>) -> Self {
        Self::failure(id, ACK_TIMEOUT_ERROR)
    }

    /// Whether this is a synthesized timeout acknowledgment.
    pub fn is_timeout(&self) -> bool {
        !self.success && self.error.as_deref() == Some(ACK_TIMEOUT_ERROR)
    }
}

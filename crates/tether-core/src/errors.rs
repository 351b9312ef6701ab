//! Error codes and the error type shared by handlers, middleware, router and
//! acknowledgment manager.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::connection::ConnectionError;

// ── Error code constants ────────────────────────────────────────────

/// Registration or call with an unusable argument.
pub const INVALID_ARGUMENT: &str = "INVALID_ARGUMENT";
/// A handler rejected the payload before running.
pub const VALIDATION_FAILED: &str = "VALIDATION_FAILED";
/// A handler returned an error.
pub const HANDLER_FAILED: &str = "HANDLER_FAILED";
/// Payload could not be converted into the handler's bound type.
pub const COERCION_FAILED: &str = "COERCION_FAILED";
/// Authorization predicate refused the connection.
pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
/// The connection failed to transmit.
pub const SEND_FAILED: &str = "SEND_FAILED";
/// No acknowledgment arrived before the deadline.
pub const ACK_TIMEOUT: &str = "ACK_TIMEOUT";
/// Acknowledgment for an unknown or already-resolved id.
pub const NO_PENDING_ACK: &str = "NO_PENDING_ACK";
/// The operation was abandoned by its caller.
pub const CANCELLED: &str = "CANCELLED";
/// Downstream middleware/handlers exceeded their time budget.
pub const HANDLER_TIMEOUT: &str = "HANDLER_TIMEOUT";
/// A handler panicked.
pub const HANDLER_PANICKED: &str = "HANDLER_PANICKED";
/// Inbound payload was not valid for its event type.
pub const INVALID_PAYLOAD: &str = "INVALID_PAYLOAD";

/// Error type flowing through the dispatch and acknowledgment pipeline.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    /// Unusable argument (e.g. registering a handler without an event type).
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// What is wrong.
        message: String,
    },

    /// A handler's `validate` rejected the payload.
    #[error("validation failed for '{event_type}': {message}")]
    Validation {
        /// Event type being dispatched.
        event_type: String,
        /// Reason given by the handler.
        message: String,
    },

    /// A handler returned a failure.
    #[error("{message}")]
    Handler {
        /// Handler-provided description.
        message: String,
    },

    /// Payload could not be coerced into the handler's bound type.
    #[error("cannot coerce {actual} payload into {expected}: {message}")]
    Coercion {
        /// Rust type name the handler expects.
        expected: String,
        /// JSON kind that was received.
        actual: String,
        /// Deserializer message.
        message: String,
    },

    /// Authorization refused.
    #[error("unauthorized: {message}")]
    Unauthorized {
        /// Why access was refused.
        message: String,
    },

    /// The connection could not transmit.
    #[error("send failed: {0}")]
    Send(#[from] ConnectionError),

    /// No acknowledgment before the deadline.
    #[error("acknowledgment timeout for '{ack_id}'")]
    AckTimeout {
        /// Correlation id that timed out.
        ack_id: String,
    },

    /// Acknowledgment for an id that is not pending.
    #[error("no pending acknowledgment for '{ack_id}'")]
    NoPendingAck {
        /// Correlation id carried by the ack.
        ack_id: String,
    },

    /// Abandoned by the caller.
    #[error("cancelled: {message}")]
    Cancelled {
        /// What was cancelled.
        message: String,
    },

    /// Downstream processing exceeded its budget.
    #[error("handling '{event_type}' timed out after {after:?}")]
    Timeout {
        /// Event type being dispatched.
        event_type: String,
        /// Budget that was exceeded.
        after: Duration,
    },

    /// A handler panicked while processing the event.
    #[error("handler for '{event_type}' panicked: {message}")]
    Panicked {
        /// Event type being dispatched.
        event_type: String,
        /// Panic payload, if it was a string.
        message: String,
    },

    /// Malformed payload.
    #[error("invalid event payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),
}

impl EventError {
    /// Convenience constructor for handler failures.
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler {
            message: message.into(),
        }
    }

    /// Convenience constructor for invalid arguments.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Convenience constructor for authorization failures.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    /// Machine-readable error code for this variant.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument { .. } => INVALID_ARGUMENT,
            Self::Validation { .. } => VALIDATION_FAILED,
            Self::Handler { .. } => HANDLER_FAILED,
            Self::Coercion { .. } => COERCION_FAILED,
            Self::Unauthorized { .. } => UNAUTHORIZED,
            Self::Send(_) => SEND_FAILED,
            Self::AckTimeout { .. } => ACK_TIMEOUT,
            Self::NoPendingAck { .. } => NO_PENDING_ACK,
            Self::Cancelled { .. } => CANCELLED,
            Self::Timeout { .. } => HANDLER_TIMEOUT,
            Self::Panicked { .. } => HANDLER_PANICKED,
            Self::InvalidPayload(_) => INVALID_PAYLOAD,
        }
    }

    /// Convert to the body adapters put in an `"error"` event.
    pub fn to_error_body(&self) -> ErrorBody {
        ErrorBody {
            code: self.code().to_owned(),
            message: self.to_string(),
        }
    }
}

/// Wire-format error description.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable code (e.g. `NO_PENDING_ACK`).
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

/// Result alias for dispatch operations.
pub type Result<T> = std::result::Result<T, EventError>;

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn handler_error_displays_message_verbatim() {
        let err = EventError::handler("db unavailable");
        assert_eq!(err.to_string(), "db unavailable");
        assert_eq!(err.code(), HANDLER_FAILED);
    }

    #[test]
    fn no_pending_ack_names_the_id() {
        let err = EventError::NoPendingAck {
            ack_id: "ack_1".into(),
        };
        assert_eq!(err.code(), NO_PENDING_ACK);
        assert!(err.to_string().contains("ack_1"));
    }

    #[test]
    fn coercion_names_both_types() {
        let err = EventError::Coercion {
            expected: "app::ChatMessage".into(),
            actual: "string".into(),
            message: "invalid type".into(),
        };
        let text = err.to_string();
        assert!(text.contains("app::ChatMessage"));
        assert!(text.contains("string"));
    }

    #[test]
    fn connection_error_converts_to_send() {
        let err: EventError = ConnectionError::Closed { id: "c1".into() }.into();
        assert_matches!(err, EventError::Send(ConnectionError::Closed { .. }));
        assert_eq!(err.code(), SEND_FAILED);
    }

    #[test]
    fn json_error_converts_to_invalid_payload() {
        let json_err = serde_json::from_str::<serde_json::Value>("{bad").unwrap_err();
        let err: EventError = json_err.into();
        assert_eq!(err.code(), INVALID_PAYLOAD);
    }

    #[test]
    fn error_body_carries_code_and_message() {
        let body = EventError::unauthorized("not a member").to_error_body();
        assert_eq!(body.code, UNAUTHORIZED);
        assert_eq!(body.message, "unauthorized: not a member");
    }

    #[test]
    fn timeout_display_includes_budget() {
        let err = EventError::Timeout {
            event_type: "slow".into(),
            after: Duration::from_millis(250),
        };
        assert!(err.to_string().contains("250ms"));
        assert_eq!(err.code(), HANDLER_TIMEOUT);
    }
}

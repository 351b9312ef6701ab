//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so partial JSON
//! is accepted and missing fields take their [`Default`] value.

mod events;
mod server;

pub use events::*;
pub use server::*;

use serde::{Deserialize, Serialize};

/// Root settings for the tether daemon.
///
/// ```json
/// {
///   "server": { "port": 9090 },
///   "acks": { "timeoutMs": 5000 }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TetherSettings {
    /// Transport settings.
    pub server: ServerSettings,
    /// Router settings.
    pub router: RouterSettings,
    /// Acknowledgment settings.
    pub acks: AckSettings,
    /// Ack batcher settings.
    pub batcher: BatcherSettings,
    /// Logging settings.
    pub logging: LoggingSettings,
}

impl TetherSettings {
    /// Reject combinations the daemon cannot run with.
    pub fn validate(&self) -> crate::Result<()> {
        let checks = [
            (self.server.port == 0, "server.port", "must be non-zero"),
            (
                self.server.max_connections == 0,
                "server.maxConnections",
                "must be positive",
            ),
            (
                self.server.send_queue_capacity == 0,
                "server.sendQueueCapacity",
                "must be positive",
            ),
            (
                self.server.max_inflight_per_connection == 0,
                "server.maxInflightPerConnection",
                "must be positive",
            ),
            (
                self.router.namespaces.iter().any(|ns| ns.trim().is_empty()),
                "router.namespaces",
                "must not contain empty names",
            ),
            (
                self.server.heartbeat_timeout_ms <= self.server.heartbeat_interval_ms,
                "server.heartbeatTimeoutMs",
                "must exceed heartbeatIntervalMs",
            ),
            (self.acks.timeout_ms == 0, "acks.timeoutMs", "must be positive"),
            (self.batcher.max_size == 0, "batcher.maxSize", "must be positive"),
        ];
        match checks.into_iter().find(|(failed, _, _)| *failed) {
            Some((_, field, reason)) => Err(crate::SettingsError::Invalid { field, reason }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults() {
        let settings = TetherSettings::default();
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.acks.timeout_ms, 30_000);
        assert_eq!(settings.batcher.max_size, 100);
        assert!(settings.router.validate_events);
        assert_eq!(settings.logging.level, LogLevel::Info);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn camel_case_wire_format() {
        let value = serde_json::to_value(TetherSettings::default()).unwrap();
        assert!(value["server"]["maxConnections"].is_number());
        assert!(value["router"]["historyTtlSecs"].is_number());
        assert_eq!(value["logging"]["level"], json!("info"));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let settings: TetherSettings =
            serde_json::from_value(json!({"batcher": {"maxSize": 7}})).unwrap();
        assert_eq!(settings.batcher.max_size, 7);
        assert_eq!(settings.batcher.interval_ms, 1000);
        assert_eq!(settings.server, ServerSettings::default());
    }

    #[test]
    fn validate_rejects_bad_heartbeat() {
        let mut settings = TetherSettings::default();
        settings.server.heartbeat_timeout_ms = settings.server.heartbeat_interval_ms;
        assert!(matches!(
            settings.validate(),
            Err(crate::SettingsError::Invalid {
                field: "server.heartbeatTimeoutMs",
                ..
            })
        ));
    }

    #[test]
    fn validate_rejects_zero_inflight_and_blank_namespaces() {
        let mut settings = TetherSettings::default();
        settings.server.max_inflight_per_connection = 0;
        assert!(matches!(
            settings.validate(),
            Err(crate::SettingsError::Invalid {
                field: "server.maxInflightPerConnection",
                ..
            })
        ));

        let mut settings: TetherSettings =
            serde_json::from_value(json!({"router": {"namespaces": ["lobby", " "]}})).unwrap();
        assert_eq!(settings.router.namespaces, vec!["lobby", " "]);
        assert!(matches!(
            settings.validate(),
            Err(crate::SettingsError::Invalid {
                field: "router.namespaces",
                ..
            })
        ));
        settings.router.namespaces.truncate(1);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn log_level_filter_strings() {
        assert_eq!(LogLevel::Warn.as_filter_str(), "warn");
        assert_eq!(LogLevel::default().as_filter_str(), "info");
    }
}

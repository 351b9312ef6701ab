//! `tracing` subscriber setup.
//!
//! Dispatch, acknowledgment and transport code log through `tracing` macros;
//! binaries call [`init`] once at startup with the configured level and
//! [`LogFormat`]. Output always goes to stderr.

use tracing_subscriber::EnvFilter;

/// Fallback directive when neither `RUST_LOG` nor the configured level parse.
const FALLBACK_LEVEL: &str = "info";

/// Line format of the global subscriber.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Single-line human-readable output with targets.
    #[default]
    Compact,
    /// One JSON object per line.
    Json,
}

impl LogFormat {
    /// `Json` when `json` is set, `Compact` otherwise.
    pub fn from_json_flag(json: bool) -> Self {
        if json { Self::Json } else { Self::Compact }
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over `level` when set and valid. Only the
/// first call in a process installs anything.
pub fn init(level: &str, format: LogFormat) {
    let filter = filter_from(std::env::var("RUST_LOG").ok().as_deref(), level);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    // A subscriber installed earlier wins.
    let _ = match format {
        LogFormat::Compact => builder.with_target(true).compact().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

/// First directive set that parses: `env`, then `level`, then `info`.
fn filter_from(env: Option<&str>, level: &str) -> EnvFilter {
    env.into_iter()
        .chain([level])
        .filter(|directives| !directives.trim().is_empty())
        .find_map(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(FALLBACK_LEVEL))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_directives_win_over_level() {
        let filter = filter_from(Some("tether_ack=trace"), "warn");
        assert_eq!(filter.to_string(), "tether_ack=trace");
    }

    #[test]
    fn level_used_without_env() {
        assert_eq!(filter_from(None, "debug").to_string(), "debug");
        assert_eq!(filter_from(Some("  "), "debug").to_string(), "debug");
    }

    #[test]
    fn unparsable_directives_fall_back() {
        assert_eq!(filter_from(Some("=[bad"), "debug").to_string(), "debug");
        assert_eq!(filter_from(None, "=[bad").to_string(), "info");
    }

    #[test]
    fn json_flag_selects_format() {
        assert_eq!(LogFormat::from_json_flag(true), LogFormat::Json);
        assert_eq!(LogFormat::from_json_flag(false), LogFormat::Compact);
    }

    #[test]
    fn repeated_init_is_harmless() {
        init("warn", LogFormat::Compact);
        init("debug", LogFormat::Json);
    }
}

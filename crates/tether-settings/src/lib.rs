//! # tether-settings
//!
//! Layered configuration for the tether daemon.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`TetherSettings::default()`]
//! 2. **User file**: `~/.tether/settings.json`, or an explicit path,
//!    deep-merged over the defaults
//! 3. **Environment variables**: `TETHER_*` overrides
//!
//! There is no global instance. The daemon loads settings once at startup
//! and passes the pieces it needs to each component.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides, deep_merge, load_settings, load_settings_from_path,
    settings_path,
};
pub use types::*;

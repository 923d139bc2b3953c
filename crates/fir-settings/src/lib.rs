//! # fir-settings
//!
//! Layered configuration: compiled defaults, an optional JSON file
//! (`$FIR_SETTINGS` or `./fir.json`), then `FIR_*` environment overrides.
//!
//! Settings are loaded once at startup and passed down explicitly.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::{
    BrokerKind, FirSettings, LoggingSettings, PubSubSettings, ServerSettings, SessionSettings,
    TemplateSettings,
};

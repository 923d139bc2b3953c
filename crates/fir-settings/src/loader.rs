//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`FirSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `FIR_*` environment variable overrides (highest priority)
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::{BrokerKind, FirSettings};

/// Minimum length of a session signing secret.
pub const MIN_SECRET_LEN: usize = 64;

/// Resolve the settings file: `$FIR_SETTINGS`, else `./fir.json`.
pub fn settings_path() -> PathBuf {
    read_env_string("FIR_SETTINGS").map_or_else(|| PathBuf::from("fir.json"), PathBuf::from)
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<FirSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or an invalid merged value
/// is an error.
pub fn load_settings_from_path(path: &Path) -> Result<FirSettings> {
    let defaults = serde_json::to_value(FirSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: FirSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are logged and ignored.
pub fn apply_env_overrides(settings: &mut FirSettings) {
    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = read_env_string("FIR_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read_env_u16("FIR_PORT", 0, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = read_env_u64("FIR_HANDLER_TIMEOUT_MS", 1, 3_600_000) {
        settings.server.handler_timeout_ms = v;
    }
    if let Some(v) = read_env_usize("FIR_MAX_MESSAGE_SIZE", 1024, 64 * 1024 * 1024) {
        settings.server.max_message_size = v;
    }
    if let Some(v) = read_env_bool("FIR_METRICS") {
        settings.server.metrics = v;
    }

    // ── Session ─────────────────────────────────────────────────────
    if let Some(v) = read_env_string("FIR_SESSION_SECRET") {
        settings.session.secret = Some(v);
    }
    if let Some(v) = read_env_bool("FIR_SESSION_SECURE") {
        settings.session.secure = v;
    }

    // ── Templates ───────────────────────────────────────────────────
    if let Some(v) = read_env_string("FIR_PUBLIC_DIR") {
        settings.templates.public_dir = v;
    }
    if let Some(v) = read_env_bool("FIR_DEV_MODE") {
        settings.templates.dev_mode = v;
    }

    // ── Pub/sub ─────────────────────────────────────────────────────
    if let Some(v) = read_env_string("FIR_REDIS_URL") {
        settings.pubsub.broker = BrokerKind::Redis;
        settings.pubsub.redis_url = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = read_env_string("FIR_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_bool("FIR_LOG_JSON") {
        settings.logging.json = v;
    }
}

/// Reject settings that would fail later at startup.
pub fn validate(settings: &FirSettings) -> Result<()> {
    if let Some(secret) = &settings.session.secret {
        if secret.len() < MIN_SECRET_LEN {
            return Err(SettingsError::InvalidValue(format!(
                "session.secret must be at least {MIN_SECRET_LEN} bytes, got {}",
                secret.len()
            )));
        }
    }
    if settings.pubsub.broker == BrokerKind::Redis && settings.pubsub.redis_url.is_empty() {
        return Err(SettingsError::InvalidValue(
            "pubsub.redisUrl is required for the redis broker".to_string(),
        ));
    }
    if settings.server.send_buffer == 0 || settings.pubsub.subscriber_buffer == 0 {
        return Err(SettingsError::InvalidValue(
            "buffer sizes must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers ─────────────────────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_u16(name: &str, min: u16, max: u16) -> Option<u16> {
    let val = std::env::var(name).ok()?;
    let result = parse_u16_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

fn read_env_usize(name: &str, min: usize, max: usize) -> Option<usize> {
    let val = std::env::var(name).ok()?;
    let result = parse_usize_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_objects_recursively() {
        let target = json!({"server": {"host": "a", "port": 1}});
        let source = json!({"server": {"port": 2}});
        assert_eq!(
            deep_merge(target, source),
            json!({"server": {"host": "a", "port": 2}})
        );
    }

    #[test]
    fn merge_replaces_arrays() {
        let target = json!({"ext": [".html", ".tmpl"]});
        let source = json!({"ext": [".gohtml"]});
        assert_eq!(deep_merge(target, source), json!({"ext": [".gohtml"]}));
    }

    #[test]
    fn merge_skips_null() {
        let target = json!({"a": 1});
        let source = json!({"a": null, "b": 2});
        assert_eq!(deep_merge(target, source), json!({"a": 1, "b": 2}));
    }

    // ── parsing ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("on"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("Off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u16_range("8080", 1, 65535), Some(8080));
        assert_eq!(parse_u16_range("0", 1, 65535), None);
        assert_eq!(parse_u16_range("70000", 1, 65535), None);
        assert_eq!(parse_u64_range("500", 1, 1000), Some(500));
        assert_eq!(parse_u64_range("abc", 1, 1000), None);
        assert_eq!(parse_usize_range("2048", 1024, 4096), Some(2048));
        assert_eq!(parse_usize_range("10", 1024, 4096), None);
    }

    // ── file loading ────────────────────────────────────────────────

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings_from_path(&dir.path().join("nope.json")).unwrap();
        assert_eq!(settings.session.cookie_name, "_fir_session");
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fir.json");
        std::fs::write(
            &path,
            r#"{"templates":{"publicDir":"./public","devMode":true},"session":{"cookieName":"sid"}}"#,
        )
        .unwrap();

        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.templates.public_dir, "./public");
        assert!(settings.templates.dev_mode);
        assert_eq!(settings.session.cookie_name, "sid");
        assert_eq!(settings.templates.extensions, vec![".html"]);
    }

    #[test]
    fn invalid_json_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fir.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            load_settings_from_path(&path),
            Err(SettingsError::Json(_))
        ));
    }

    // ── validation ──────────────────────────────────────────────────

    #[test]
    fn short_secret_rejected() {
        let mut settings = FirSettings::default();
        settings.session.secret = Some("short".to_string());
        let err = validate(&settings).unwrap_err();
        assert!(err.to_string().contains("at least 64 bytes"));
    }

    #[test]
    fn long_secret_accepted() {
        let mut settings = FirSettings::default();
        settings.session.secret = Some("x".repeat(MIN_SECRET_LEN));
        assert!(validate(&settings).is_ok());
    }

    #[test]
    fn redis_without_url_rejected() {
        let mut settings = FirSettings::default();
        settings.pubsub.broker = BrokerKind::Redis;
        settings.pubsub.redis_url.clear();
        assert!(validate(&settings).is_err());
    }

    #[test]
    fn zero_buffer_rejected() {
        let mut settings = FirSettings::default();
        settings.pubsub.subscriber_buffer = 0;
        assert!(validate(&settings).is_err());
    }

    #[test]
    fn defaults_snapshot() {
        insta::assert_json_snapshot!(FirSettings::default(), @r#"
        {
          "server": {
            "host": "127.0.0.1",
            "port": 9867,
            "heartbeatIntervalMs": 30000,
            "heartbeatTimeoutMs": 60000,
            "maxMessageSize": 1048576,
            "sendBuffer": 256,
            "handlerTimeoutMs": 30000,
            "metrics": false
          },
          "session": {
            "cookieName": "_fir_session",
            "secure": false
          },
          "templates": {
            "publicDir": ".",
            "extensions": [
              ".html"
            ],
            "devMode": false
          },
          "pubsub": {
            "broker": "memory",
            "redisUrl": "redis://127.0.0.1:6379",
            "subscriberBuffer": 64
          },
          "logging": {
            "level": "info",
            "json": false
          }
        }
        "#);
    }
}

//! Settings type definitions.
//!
//! Field names are camelCase on the wire. Every section is `#[serde(default)]`
//! so a settings file only needs the keys it overrides.

use serde::{Deserialize, Serialize};

/// Root settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FirSettings {
    /// HTTP / WebSocket server.
    pub server: ServerSettings,
    /// Session cookie.
    pub session: SessionSettings,
    /// Template loading and caching.
    pub templates: TemplateSettings,
    /// Pub/sub broker selection.
    pub pubsub: PubSubSettings,
    /// Logging.
    pub logging: LoggingSettings,
}

/// Server network and connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` picks a free port).
    pub port: u16,
    /// Interval between server pings, in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Close a connection after this long without a pong, in milliseconds.
    pub heartbeat_timeout_ms: u64,
    /// Maximum inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Outbound frame buffer per connection.
    pub send_buffer: usize,
    /// Maximum time a user handler may run, in milliseconds.
    pub handler_timeout_ms: u64,
    /// Install the Prometheus recorder and serve `/metrics`.
    pub metrics: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9867,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 60_000,
            max_message_size: 1024 * 1024,
            send_buffer: 256,
            handler_timeout_ms: 30_000,
            metrics: false,
        }
    }
}

/// Session cookie settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    /// Cookie name.
    pub cookie_name: String,
    /// Signing secret; at least 64 bytes. A random key is generated when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    /// Set the `Secure` attribute.
    pub secure: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            cookie_name: "_fir_session".to_string(),
            secret: None,
            secure: false,
        }
    }
}

/// Template settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TemplateSettings {
    /// Root directory file template paths are resolved against.
    pub public_dir: String,
    /// File extensions picked up from partial directories.
    pub extensions: Vec<String>,
    /// Recompile templates before every page render.
    pub dev_mode: bool,
}

impl Default for TemplateSettings {
    fn default() -> Self {
        Self {
            public_dir: ".".to_string(),
            extensions: vec![".html".to_string()],
            dev_mode: false,
        }
    }
}

/// Which broker carries broadcasts.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerKind {
    /// In-process fan-out.
    #[default]
    Memory,
    /// Redis PUBLISH/SUBSCRIBE.
    Redis,
}

/// Pub/sub settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PubSubSettings {
    /// Broker implementation.
    pub broker: BrokerKind,
    /// Redis URL, used when `broker` is `redis`.
    pub redis_url: String,
    /// Per-subscriber buffer; messages beyond it are dropped.
    pub subscriber_buffer: usize,
}

impl Default for PubSubSettings {
    fn default() -> Self {
        Self {
            broker: BrokerKind::Memory,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            subscriber_buffer: 64,
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive (overridden by `RUST_LOG`).
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

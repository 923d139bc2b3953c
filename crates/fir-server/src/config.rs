//! Server configuration.

use std::time::Duration;

use fir_settings::FirSettings;
use serde::{Deserialize, Serialize};

/// Session cookie configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Cookie name (default `"_fir_session"`).
    pub cookie_name: String,
    /// Signing secret; a random key is generated per process when unset.
    #[serde(skip_serializing)]
    pub secret: Option<String>,
    /// Set the `Secure` cookie attribute.
    pub secure: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "_fir_session".into(),
            secret: None,
            secure: false,
        }
    }
}

/// Configuration for the fir server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Heartbeat interval in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Close a connection after this long without a pong, in milliseconds.
    pub heartbeat_timeout_ms: u64,
    /// Max WebSocket message and request body size in bytes.
    pub max_message_size: usize,
    /// Outbound frame buffer per connection.
    pub send_buffer: usize,
    /// Max time a user handler may run, in milliseconds.
    pub handler_timeout_ms: u64,
    /// Recompile route templates before every page render.
    pub dev_mode: bool,
    /// Extensions picked up from partial directories, unless a route sets its own.
    pub template_extensions: Vec<String>,
    /// Install the Prometheus recorder and serve `/metrics`.
    pub metrics: bool,
    /// Session cookie.
    pub session: SessionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 60_000,
            max_message_size: 1024 * 1024,
            send_buffer: 256,
            handler_timeout_ms: 30_000,
            dev_mode: false,
            template_extensions: vec![".html".into()],
            metrics: false,
            session: SessionConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Heartbeat interval.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Heartbeat timeout.
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    /// Handler timeout.
    pub fn handler_timeout(&self) -> Duration {
        Duration::from_millis(self.handler_timeout_ms)
    }

    /// `host:port` bind address.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl From<&FirSettings> for ServerConfig {
    fn from(settings: &FirSettings) -> Self {
        let server = &settings.server;
        Self {
            host: server.host.clone(),
            port: server.port,
            heartbeat_interval_ms: server.heartbeat_interval_ms,
            heartbeat_timeout_ms: server.heartbeat_timeout_ms,
            max_message_size: server.max_message_size,
            send_buffer: server.send_buffer,
            handler_timeout_ms: server.handler_timeout_ms,
            dev_mode: settings.templates.dev_mode,
            template_extensions: settings.templates.extensions.clone(),
            metrics: server.metrics,
            session: SessionConfig {
                cookie_name: settings.session.cookie_name.clone(),
                secret: settings.session.secret.clone(),
                secure: settings.session.secure,
            },
        }
    }
}

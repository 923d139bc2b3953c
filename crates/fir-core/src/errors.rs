//! Error taxonomy shared by every fir crate.
//!
//! Each variant maps to one propagation policy:
//!
//! - [`FirError::Validation`]: recovered locally as field errors
//! - [`FirError::NotFound`], [`FirError::Render`], [`FirError::Handler`]: routed
//!   to the route's error content with a status
//! - [`FirError::Transport`]: logged, never fails a reply already produced
//! - [`FirError::Protocol`]: malformed wire event or frame
//! - [`FirError::Template`], [`FirError::Config`]: fatal at load time

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Parameter binding or decoding failed.
pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
/// Unknown event id, template or handler.
pub const NOT_FOUND: &str = "NOT_FOUND";
/// Template execution failed.
pub const RENDER_ERROR: &str = "RENDER_ERROR";
/// Broker unavailable or publish failed.
pub const TRANSPORT_ERROR: &str = "TRANSPORT_ERROR";
/// Malformed wire event or frame.
pub const PROTOCOL_ERROR: &str = "PROTOCOL_ERROR";
/// Template compilation or markup translation failed.
pub const TEMPLATE_ERROR: &str = "TEMPLATE_ERROR";
/// Invalid route or server configuration.
pub const CONFIG_ERROR: &str = "CONFIG_ERROR";
/// A user handler reported a failure.
pub const HANDLER_ERROR: &str = "HANDLER_ERROR";

/// Top-level error type for the event-to-patch pipeline.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FirError {
    /// Parameter bind/decode failure, optionally scoped to one form field.
    #[error("{message}")]
    Validation {
        /// Field the failure belongs to, when known.
        field: Option<String>,
        /// Human-readable message.
        message: String,
    },

    /// Unknown event id, missing template or handler.
    #[error("{what} not found")]
    NotFound {
        /// What was looked up.
        what: String,
    },

    /// Template execution failure.
    #[error("failed to render template '{template}': {message}")]
    Render {
        /// Template (or block) name.
        template: String,
        /// Engine message.
        message: String,
    },

    /// Broker unavailable or publish failure.
    #[error("transport error: {message}")]
    Transport {
        /// Description.
        message: String,
    },

    /// Malformed wire event or frame.
    #[error("protocol error: {message}")]
    Protocol {
        /// Description.
        message: String,
    },

    /// Template compilation or markup translation failure.
    #[error("template error: {message}")]
    Template {
        /// Description.
        message: String,
    },

    /// Invalid route or server configuration.
    #[error("config error: {message}")]
    Config {
        /// Description.
        message: String,
    },

    /// Generic failure reported by a user handler.
    #[error("{message}")]
    Handler {
        /// Description.
        message: String,
    },
}

impl FirError {
    /// Validation error not tied to a field.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            field: None,
            message: message.into(),
        }
    }

    /// Validation error scoped to `field`.
    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: Some(field.into()),
            message: message.into(),
        }
    }

    /// Not-found error for `what`.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Render error for `template`.
    pub fn render(template: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Render {
            template: template.into(),
            message: message.into(),
        }
    }

    /// Transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Template compilation error.
    pub fn template(message: impl Into<String>) -> Self {
        Self::Template {
            message: message.into(),
        }
    }

    /// Configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Handler error.
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler {
            message: message.into(),
        }
    }

    /// Machine-readable code for this variant.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => VALIDATION_ERROR,
            Self::NotFound { .. } => NOT_FOUND,
            Self::Render { .. } => RENDER_ERROR,
            Self::Transport { .. } => TRANSPORT_ERROR,
            Self::Protocol { .. } => PROTOCOL_ERROR,
            Self::Template { .. } => TEMPLATE_ERROR,
            Self::Config { .. } => CONFIG_ERROR,
            Self::Handler { .. } => HANDLER_ERROR,
        }
    }

    /// Whether this error must abort startup rather than a single request.
    pub fn is_fatal_at_load(&self) -> bool {
        matches!(self, Self::Template { .. } | Self::Config { .. })
    }

    /// Wire-format body for error replies.
    pub fn to_error_body(&self) -> ErrorBody {
        ErrorBody {
            code: self.code().to_owned(),
            message: self.to_string(),
        }
    }
}

/// Serializable error body handed to error templates and JSON replies.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    /// Machine-readable code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl From<serde_json::Error> for FirError {
    fn from(err: serde_json::Error) -> Self {
        Self::validation(err.to_string())
    }
}

/// Result alias for fir operations.
pub type Result<T> = std::result::Result<T, FirError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(FirError::validation("x").code(), VALIDATION_ERROR);
        assert_eq!(FirError::not_found("x").code(), NOT_FOUND);
        assert_eq!(FirError::render("t", "x").code(), RENDER_ERROR);
        assert_eq!(FirError::transport("x").code(), TRANSPORT_ERROR);
        assert_eq!(FirError::protocol("x").code(), PROTOCOL_ERROR);
        assert_eq!(FirError::template("x").code(), TEMPLATE_ERROR);
        assert_eq!(FirError::config("x").code(), CONFIG_ERROR);
        assert_eq!(FirError::handler("x").code(), HANDLER_ERROR);
    }

    #[test]
    fn not_found_display() {
        let err = FirError::not_found("event 'delete'");
        assert_eq!(err.to_string(), "event 'delete' not found");
    }

    #[test]
    fn render_display_names_template() {
        let err = FirError::render("todo", "undefined value");
        assert_eq!(
            err.to_string(),
            "failed to render template 'todo': undefined value"
        );
    }

    #[test]
    fn only_load_errors_are_fatal() {
        assert!(FirError::template("bad").is_fatal_at_load());
        assert!(FirError::config("bad").is_fatal_at_load());
        assert!(!FirError::render("t", "bad").is_fatal_at_load());
        assert!(!FirError::transport("down").is_fatal_at_load());
    }

    #[test]
    fn field_validation_keeps_field() {
        let err = FirError::field("email", "is required");
        assert_eq!(
            err,
            FirError::Validation {
                field: Some("email".into()),
                message: "is required".into(),
            }
        );
        assert_eq!(err.to_string(), "is required");
    }

    #[test]
    fn serde_json_error_is_validation() {
        let json_err = serde_json::from_str::<u32>("\"nope\"").unwrap_err();
        let err: FirError = json_err.into();
        assert_eq!(err.code(), VALIDATION_ERROR);
    }

    #[test]
    fn error_body() {
        let body = FirError::protocol("bad frame").to_error_body();
        assert_eq!(body.code, PROTOCOL_ERROR);
        assert_eq!(body.message, "protocol error: bad frame");
    }
}

//! Wire events.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{FirError, Result};

/// Id of the synthetic event dispatched to a route's `onLoad` handler.
pub const LOAD_EVENT: &str = "load";

/// A decoded unit of work: which handler to invoke and its arguments.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Handler id.
    pub id: String,
    /// Handler-specific arguments, opaque to the pipeline.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
    /// Whether `params` holds form fields rather than a JSON document.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_form: bool,
    /// Selector of the element that raised the event, if the client sent one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Client-side key of the element that raised the event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_key: Option<String>,
}

impl Event {
    /// Event with JSON params.
    pub fn new(id: impl Into<String>, params: Value) -> Self {
        Self {
            id: id.into(),
            params,
            ..Self::default()
        }
    }

    /// Event whose params are form fields.
    pub fn form(id: impl Into<String>, params: Value) -> Self {
        Self {
            is_form: true,
            ..Self::new(id, params)
        }
    }

    /// The synthetic `load` event.
    pub fn load() -> Self {
        Self::new(LOAD_EVENT, Value::Null)
    }

    /// Whether this is the synthetic `load` event.
    pub fn is_load(&self) -> bool {
        self.id == LOAD_EVENT
    }

    /// Decode one JSON-encoded event (request body or socket frame).
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let event: Self = serde_json::from_slice(bytes)
            .map_err(|e| FirError::protocol(format!("invalid event: {e}")))?;
        if event.id.trim().is_empty() {
            return Err(FirError::protocol("event id is empty"));
        }
        Ok(event)
    }
}

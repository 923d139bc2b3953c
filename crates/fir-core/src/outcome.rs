//! Handler outcomes.
//!
//! A handler returns exactly one [`Outcome`] per invocation. The enum is the
//! only way to express a result, so "data and patches at once" cannot be
//! built; [`Outcome::RouteDataWithState`] is the single combined case.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::errors::FirError;
use crate::patch::PatchList;

/// Field name → message.
pub type FieldErrors = BTreeMap<String, String>;

/// What a user handler produced.
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    /// Success with nothing to change.
    None,
    /// Template hydration data for the next render.
    RouteData(Map<String, Value>),
    /// Client store state, not rendered into templates.
    StateData(Map<String, Value>),
    /// Both of the above.
    RouteDataWithState {
        /// Template hydration data.
        route: Map<String, Value>,
        /// Client store state.
        state: Map<String, Value>,
    },
    /// Field-scoped validation messages.
    FieldErrors(FieldErrors),
    /// Explicit ordered instructions.
    Patches(PatchList),
    /// Failure routed to the route's error content.
    Error(FirError),
}

impl Outcome {
    /// Short name used in logs and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::RouteData(_) => "route_data",
            Self::StateData(_) => "state_data",
            Self::RouteDataWithState { .. } => "route_data_with_state",
            Self::FieldErrors(_) => "field_errors",
            Self::Patches(_) => "patches",
            Self::Error(_) => "error",
        }
    }

    /// Whether this outcome is a failure.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Route data from a JSON value; non-object values are stored under `data`.
    pub fn route_data(value: Value) -> Self {
        Self::RouteData(into_map(value))
    }

    /// State data from a JSON value; non-object values are stored under `data`.
    pub fn state_data(value: Value) -> Self {
        Self::StateData(into_map(value))
    }

    /// Single field error.
    pub fn field_error(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = FieldErrors::new();
        let _ = errors.insert(field.into(), message.into());
        Self::FieldErrors(errors)
    }
}

impl From<FirError> for Outcome {
    fn from(err: FirError) -> Self {
        match err {
            FirError::Validation {
                field: Some(field),
                message,
            } => Self::field_error(field, message),
            other => Self::Error(other),
        }
    }
}

impl From<PatchList> for Outcome {
    fn from(patches: PatchList) -> Self {
        Self::Patches(patches)
    }
}

impl<T: Into<Outcome>> From<Result<T, FirError>> for Outcome {
    fn from(result: Result<T, FirError>) -> Self {
        match result {
            Ok(outcome) => outcome.into(),
            Err(err) => err.into(),
        }
    }
}

fn into_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            let _ = map.insert("data".to_owned(), other);
            map
        }
    }
}

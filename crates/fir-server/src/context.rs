//! Per-dispatch context handed to event handlers.

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};

use fir_core::{ConnectionId, Event, FieldErrors, FirError, Outcome, PatchList, RequestId, SessionId};
use regex::Regex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::route::Route;

static FIELD_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"field `([^`]+)`").expect("field pattern"));

/// What is known about the request or connection an event arrived on.
#[derive(Clone, Debug, Default)]
pub struct RequestInfo {
    /// Request path.
    pub path: String,
    /// Raw query string, without the `?`.
    pub query: Option<String>,
    /// Path parameters.
    pub path_params: BTreeMap<String, String>,
    /// Session bound from the cookie.
    pub session_id: SessionId,
    /// WebSocket connection the event belongs to, if any.
    pub connection_id: Option<ConnectionId>,
    /// Id of this request.
    pub request_id: RequestId,
}

impl RequestInfo {
    /// Info for `path` with a fresh session and request id.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Replace the session id.
    #[must_use]
    pub fn with_session(mut self, session_id: SessionId) -> Self {
        self.session_id = session_id;
        self
    }

    /// Id recorded as the origin of published replies: the connection if
    /// known, else the request.
    pub fn origin(&self) -> &str {
        self.connection_id
            .as_ref()
            .map_or(self.request_id.as_str(), ConnectionId::as_str)
    }

    /// First value of query parameter `name`.
    pub fn query_param(&self, name: &str) -> Option<String> {
        let query = self.query.as_deref()?;
        serde_urlencoded::from_str::<Vec<(String, String)>>(query)
            .ok()?
            .into_iter()
            .find_map(|(key, value)| (key == name).then_some(value))
    }
}

/// One dispatch: the event, where it came from, and the route handling it.
#[derive(Clone)]
pub struct RouteContext {
    event: Event,
    request: RequestInfo,
    route: Arc<Route>,
}

impl std::fmt::Debug for RouteContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteContext")
            .field("event", &self.event.id)
            .field("route", &self.route.id())
            .field("request_id", &self.request.request_id)
            .finish_non_exhaustive()
    }
}

impl RouteContext {
    /// Context for one dispatch.
    pub fn new(event: Event, request: RequestInfo, route: Arc<Route>) -> Self {
        Self {
            event,
            request,
            route,
        }
    }

    /// The event being handled.
    pub fn event(&self) -> &Event {
        &self.event
    }

    /// Event id.
    pub fn event_id(&self) -> &str {
        &self.event.id
    }

    /// Raw event params.
    pub fn params(&self) -> &Value {
        &self.event.params
    }

    /// Whether the params are form fields.
    pub fn is_form(&self) -> bool {
        self.event.is_form
    }

    /// Request details.
    pub fn request(&self) -> &RequestInfo {
        &self.request
    }

    /// The route handling the event.
    pub fn route(&self) -> &Arc<Route> {
        &self.route
    }

    /// Route id.
    pub fn route_id(&self) -> &str {
        self.route.id()
    }

    /// Session id.
    pub fn session_id(&self) -> &SessionId {
        &self.request.session_id
    }

    /// WebSocket connection id, for socket events.
    pub fn connection_id(&self) -> Option<&ConnectionId> {
        self.request.connection_id.as_ref()
    }

    /// Request id.
    pub fn request_id(&self) -> &RequestId {
        &self.request.request_id
    }

    /// Decode the event params into `T`.
    ///
    /// Form params are decoded with form-field semantics (every value is a
    /// string, numbers parse from text); JSON params are decoded as JSON.
    /// A failure naming a field becomes a field-scoped validation error.
    pub fn bind<T: DeserializeOwned>(&self) -> Result<T, FirError> {
        if self.event.is_form {
            let encoded = encode_pairs(form_pairs(&self.event.params))?;
            serde_urlencoded::from_str(&encoded).map_err(|e| bind_error(&e))
        } else {
            let params = match &self.event.params {
                Value::Null => Value::Object(Map::new()),
                other => other.clone(),
            };
            serde_json::from_value(params).map_err(|e| bind_error(&e))
        }
    }

    /// Decode the query string into `T`.
    pub fn bind_query<T: DeserializeOwned>(&self) -> Result<T, FirError> {
        serde_urlencoded::from_str(self.request.query.as_deref().unwrap_or_default())
            .map_err(|e| bind_error(&e))
    }

    /// Decode the path parameters into `T`.
    pub fn bind_path_params<T: DeserializeOwned>(&self) -> Result<T, FirError> {
        let encoded = encode_pairs(
            self.request
                .path_params
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )?;
        serde_urlencoded::from_str(&encoded).map_err(|e| bind_error(&e))
    }

    /// Decode query, path parameters and event params merged into one `T`.
    ///
    /// Later sources win per key: query, then path parameters, then event
    /// params. Form events decode everything with form-field semantics; JSON
    /// events keep typed params while query and path values stay strings.
    pub fn bind_all<T: DeserializeOwned>(&self) -> Result<T, FirError> {
        let mut merged = Map::new();
        let query: Vec<(String, String)> =
            serde_urlencoded::from_str(self.request.query.as_deref().unwrap_or_default())
                .map_err(|e| bind_error(&e))?;
        for (key, value) in query {
            push_field(&mut merged, key, value);
        }
        for (key, value) in &self.request.path_params {
            let _ = merged.insert(key.clone(), Value::String(value.clone()));
        }
        if let Value::Object(params) = &self.event.params {
            merged.extend(params.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        if self.event.is_form {
            let encoded = encode_pairs(form_pairs(&Value::Object(merged)))?;
            serde_urlencoded::from_str(&encoded).map_err(|e| bind_error(&e))
        } else {
            serde_json::from_value(Value::Object(merged)).map_err(|e| bind_error(&e))
        }
    }

    /// Template data for the next render.
    pub fn data(&self, data: impl Serialize) -> Outcome {
        match serde_json::to_value(data) {
            Ok(value) => Outcome::route_data(value),
            Err(e) => Outcome::Error(FirError::handler(format!("unserializable route data: {e}"))),
        }
    }

    /// Client store state.
    pub fn state(&self, state: impl Serialize) -> Outcome {
        match serde_json::to_value(state) {
            Ok(value) => Outcome::state_data(value),
            Err(e) => Outcome::Error(FirError::handler(format!("unserializable state: {e}"))),
        }
    }

    /// Template data and client store state together.
    pub fn data_with_state(&self, data: impl Serialize, state: impl Serialize) -> Outcome {
        let route = match self.data(data) {
            Outcome::RouteData(map) => map,
            other => return other,
        };
        match self.state(state) {
            Outcome::StateData(state) => Outcome::RouteDataWithState { route, state },
            other => other,
        }
    }

    /// One field error.
    pub fn field_error(&self, field: impl Into<String>, message: impl Into<String>) -> Outcome {
        Outcome::field_error(field, message)
    }

    /// Several field errors.
    pub fn field_errors<I, K, V>(&self, errors: I) -> Outcome
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Outcome::FieldErrors(
            errors
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect::<FieldErrors>(),
        )
    }

    /// Empty patch list to build on.
    pub fn patches(&self) -> PatchList {
        PatchList::new()
    }

    /// Route an error to the error content.
    pub fn error(&self, err: impl Into<FirError>) -> Outcome {
        Outcome::Error(err.into())
    }
}

/// Flatten form params into ordered pairs; arrays contribute one pair per item.
fn form_pairs(params: &Value) -> Vec<(String, String)> {
    let Value::Object(map) = params else {
        return Vec::new();
    };
    let mut pairs = Vec::with_capacity(map.len());
    for (key, value) in map {
        match value {
            Value::Array(items) => {
                pairs.extend(items.iter().map(|item| (key.clone(), scalar_text(item))));
            }
            other => pairs.push((key.clone(), scalar_text(other))),
        }
    }
    pairs
}

/// Insert `value` under `key`; repeated keys collect into an array.
fn push_field(map: &mut Map<String, Value>, key: String, value: String) {
    match map.get_mut(&key) {
        Some(Value::Array(values)) => values.push(Value::String(value)),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, Value::String(value)]);
        }
        None => {
            let _ = map.insert(key, Value::String(value));
        }
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn encode_pairs(pairs: Vec<(String, String)>) -> Result<String, FirError> {
    serde_urlencoded::to_string(pairs).map_err(|e| FirError::validation(e.to_string()))
}

fn bind_error(err: &dyn std::fmt::Display) -> FirError {
    let message = err.to_string();
    match FIELD_PATTERN.captures(&message) {
        Some(capture) => FirError::field(capture[1].to_owned(), message.clone()),
        None => FirError::validation(message),
    }
}

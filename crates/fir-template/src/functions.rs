//! Template function map.
//!
//! Functions are installed as template globals. A route's map is
//! [`default_functions`] with the route's own entries layered on top
//! (route entries win). Every registration carries a process-unique id that
//! enters the cache fingerprint alongside its name, so replacing a function
//! under the same name compiles a new set.

use std::collections::BTreeMap;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicU64, Ordering};

use minijinja::{State, Value};

/// Function name → registered callable.
pub type FunctionMap = BTreeMap<String, TemplateFunction>;

static NEXT_FUNCTION_ID: AtomicU64 = AtomicU64::new(1);

static DEFAULT_FUNCTIONS: LazyLock<FunctionMap> = LazyLock::new(|| {
    let mut map = FunctionMap::new();
    let _ = map.insert("fir_error".to_owned(), Value::from_function(fir_error).into());
    let _ = map.insert(
        "fir_has_error".to_owned(),
        Value::from_function(fir_has_error).into(),
    );
    let _ = map.insert(
        "fir_has_errors".to_owned(),
        Value::from_function(fir_has_errors).into(),
    );
    map
});

/// A callable registered as a template global.
///
/// Clones share the registration id; converting a [`Value`] allocates a new one.
#[derive(Clone, Debug)]
pub struct TemplateFunction {
    id: u64,
    value: Value,
}

impl TemplateFunction {
    /// Registration id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The callable.
    pub fn value(&self) -> &Value {
        &self.value
    }
}

impl From<Value> for TemplateFunction {
    fn from(value: Value) -> Self {
        Self {
            id: NEXT_FUNCTION_ID.fetch_add(1, Ordering::Relaxed),
            value,
        }
    }
}

/// Field error lookup key in render data.
pub const ERRORS_KEY: &str = "errors";

/// Functions available to every template.
///
/// - `fir_error(field)`: the field's error message, or `""`
/// - `fir_has_error(field)`: whether the field has an error
/// - `fir_has_errors()`: whether any field has an error
pub fn default_functions() -> FunctionMap {
    DEFAULT_FUNCTIONS.clone()
}

fn fir_error(state: &State, field: &str) -> String {
    field_error(state, field)
        .map(|v| v.to_string())
        .unwrap_or_default()
}

fn fir_has_error(state: &State, field: &str) -> bool {
    field_error(state, field).is_some()
}

fn fir_has_errors(state: &State) -> bool {
    state
        .lookup(ERRORS_KEY)
        .and_then(|errors| errors.len())
        .is_some_and(|n| n > 0)
}

/// Defaults merged with `overrides`; `overrides` wins on name clashes.
pub fn merge_functions(overrides: &FunctionMap) -> FunctionMap {
    let mut map = default_functions();
    map.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    map
}

fn field_error(state: &State, field: &str) -> Option<Value> {
    let errors = state.lookup(ERRORS_KEY)?;
    let value = errors.get_attr(field).ok()?;
    (!value.is_undefined() && !value.is_none()).then_some(value)
}

//! Event dispatch: find the handler, run it, turn its outcome into a reply.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::StatusCode;
use fir_core::{DomInstruction, Event, FirError, Op, Outcome, Patch, Result};
use fir_template::{ERRORS_KEY, TemplateSet, escape_html, render_patches};
use futures::FutureExt;
use metrics::{counter, histogram};
use serde_json::{Map, Value, json};
use tracing::{debug, error, instrument, warn};

use crate::context::{RequestInfo, RouteContext};
use crate::metrics::{EVENT_DURATION_SECONDS, EVENT_ERRORS_TOTAL, EVENTS_TOTAL};
use crate::route::Route;

/// Client store that `StateData` is written to.
pub const STATE_STORE: &str = "fir";

/// Key under which state is exposed to page templates.
const STATE_KEY: &str = "state";

/// How an outcome is turned into a reply.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchMode {
    /// A full HTML page (page loads, form posts from plain browsers).
    Page,
    /// DOM instructions (WebSocket frames, JSON and script-driven posts).
    Patch,
}

/// Reply payload.
#[derive(Clone, Debug, PartialEq)]
pub enum ReplyBody {
    /// Full page HTML.
    Page(String),
    /// Send the browser elsewhere.
    Redirect(String),
    /// Ordered DOM instructions.
    Instructions(Vec<DomInstruction>),
}

/// Result of one dispatch.
#[derive(Clone, Debug, PartialEq)]
pub struct Reply {
    /// HTTP status equivalent.
    pub status: StatusCode,
    /// Payload.
    pub body: ReplyBody,
}

impl Reply {
    fn ok(body: ReplyBody) -> Self {
        Self {
            status: StatusCode::OK,
            body,
        }
    }

    /// Instruction list, if this is a patch reply.
    pub fn instructions(&self) -> Option<&[DomInstruction]> {
        match &self.body {
            ReplyBody::Instructions(list) => Some(list),
            _ => None,
        }
    }

    /// Whether the dispatch succeeded.
    pub fn is_success(&self) -> bool {
        !self.status.is_client_error() && !self.status.is_server_error()
    }

    /// Whether the reply should be published to other connections.
    pub fn is_publishable(&self) -> bool {
        self.is_success() && self.instructions().is_some_and(|list| !list.is_empty())
    }
}

/// HTTP status for an error reply.
pub fn status_for(err: &FirError) -> StatusCode {
    match err {
        FirError::NotFound { .. } => StatusCode::NOT_FOUND,
        FirError::Validation { .. } | FirError::Protocol { .. } => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Run the handler for `event` and interpret its outcome.
///
/// Never fails: unknown events, handler errors, timeouts, panics and render
/// failures all come back as error replies.
#[instrument(skip_all, fields(route = %route.id(), event = %event.id, request_id = %request.request_id))]
pub async fn dispatch(
    route: &Arc<Route>,
    event: Event,
    request: RequestInfo,
    mode: DispatchMode,
    timeout: Duration,
) -> Reply {
    let started = Instant::now();
    counter!(EVENTS_TOTAL, "route" => route.id().to_owned()).increment(1);

    let Some(handler) = route.handler(&event.id).cloned() else {
        debug!("no handler for event");
        let err = FirError::not_found(format!("event '{}'", event.id));
        record_error(route, err.code());
        return error_reply(route, &err, mode);
    };

    let is_load = event.is_load();
    let path = request.path.clone();
    let ctx = RouteContext::new(event, request, Arc::clone(route));

    let outcome =
        match tokio::time::timeout(timeout, AssertUnwindSafe(handler.handle(ctx)).catch_unwind()).await
        {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => {
                error!("event handler panicked");
                Outcome::Error(FirError::handler("internal error"))
            }
            Err(_) => {
                error!(timeout_ms = timeout.as_millis() as u64, "event handler timed out");
                Outcome::Error(FirError::handler("handler timed out"))
            }
        };

    let kind = outcome.kind();
    let error_code = match &outcome {
        Outcome::Error(err) => Some(err.code()),
        _ => None,
    };
    let reply = interpret(route, outcome, is_load, &path, mode).unwrap_or_else(|err| {
        warn!(error = %err, "failed to render reply");
        record_error(route, err.code());
        error_reply(route, &err, mode)
    });
    if let Some(code) = error_code {
        record_error(route, code);
    }

    let elapsed = started.elapsed();
    histogram!(EVENT_DURATION_SECONDS, "route" => route.id().to_owned())
        .record(elapsed.as_secs_f64());
    debug!(
        outcome = kind,
        status = reply.status.as_u16(),
        duration_ms = elapsed.as_millis() as u64,
        "event dispatched"
    );
    reply
}

fn record_error(route: &Route, code: &'static str) {
    counter!(EVENT_ERRORS_TOTAL, "route" => route.id().to_owned(), "code" => code).increment(1);
}

fn interpret(
    route: &Route,
    outcome: Outcome,
    is_load: bool,
    path: &str,
    mode: DispatchMode,
) -> Result<Reply> {
    let set = route.templates().current();
    match mode {
        DispatchMode::Page => page_reply(route, &set, outcome, is_load, path),
        DispatchMode::Patch => patch_reply(route, &set, outcome),
    }
}

fn page_reply(
    route: &Route,
    set: &TemplateSet,
    outcome: Outcome,
    is_load: bool,
    path: &str,
) -> Result<Reply> {
    // after a non-load event with nothing to render, reload through onLoad
    let reload = || Ok(Reply::ok(ReplyBody::Redirect(path.to_owned())));
    let data = match outcome {
        Outcome::None if is_load => Map::new(),
        Outcome::None => return reload(),
        Outcome::RouteData(data) => data,
        Outcome::StateData(state) if is_load => keyed(STATE_KEY, Value::Object(state)),
        Outcome::StateData(_) => return reload(),
        Outcome::RouteDataWithState { mut route, state } => {
            let _ = route.insert(STATE_KEY.to_owned(), Value::Object(state));
            route
        }
        Outcome::FieldErrors(errors) => keyed(ERRORS_KEY, json!(errors)),
        Outcome::Patches(patches) => {
            let navigate = patches.iter().find_map(|p| match p {
                Patch::Navigate { url } => Some(url.clone()),
                _ => None,
            });
            match navigate {
                Some(url) => return Ok(Reply::ok(ReplyBody::Redirect(url))),
                None if is_load => Map::new(),
                None => return reload(),
            }
        }
        Outcome::Error(err) => return Ok(error_reply(route, &err, DispatchMode::Page)),
    };
    let html = set.render_page(&Value::Object(data))?;
    Ok(Reply::ok(ReplyBody::Page(html)))
}

fn patch_reply(route: &Route, set: &TemplateSet, outcome: Outcome) -> Result<Reply> {
    let selector = route.morph_selector();
    let instructions = match outcome {
        Outcome::None => Vec::new(),
        Outcome::RouteData(data) => vec![morph(selector, set.render_content(&data)?)],
        Outcome::StateData(state) => vec![store(state)],
        Outcome::RouteDataWithState { route, state } => {
            vec![morph(selector, set.render_content(&route)?), store(state)]
        }
        Outcome::FieldErrors(errors) => {
            let data = keyed(ERRORS_KEY, json!(errors));
            vec![morph(selector, set.render_content(&data)?)]
        }
        Outcome::Patches(patches) => render_patches(set, &patches)?,
        Outcome::Error(err) => return Ok(error_reply(route, &err, DispatchMode::Patch)),
    };
    Ok(Reply::ok(ReplyBody::Instructions(instructions)))
}

/// Render `err` through the route's error templates.
///
/// If the error templates themselves fail, the reply keeps the status and
/// falls back to a bare message.
pub fn error_reply(route: &Route, err: &FirError, mode: DispatchMode) -> Reply {
    let status = status_for(err);
    let data = json!({ "error": err.to_error_body() });
    let set = route.templates().current();
    let rendered = match mode {
        DispatchMode::Page => set.render_error_page(&data),
        DispatchMode::Patch => set.render_error(&data),
    };
    let html = rendered.unwrap_or_else(|render_err| {
        error!(error = %render_err, "failed to render error content");
        escape_html(&err.to_string())
    });
    let body = match mode {
        DispatchMode::Page => ReplyBody::Page(html),
        DispatchMode::Patch => ReplyBody::Instructions(vec![morph(route.morph_selector(), html)]),
    };
    Reply { status, body }
}

fn morph(selector: &str, html: String) -> DomInstruction {
    DomInstruction {
        selector: Some(selector.to_owned()),
        html: Some(html),
        ..DomInstruction::new(Op::Morph)
    }
}

fn store(state: Map<String, Value>) -> DomInstruction {
    DomInstruction {
        name: Some(STATE_STORE.to_owned()),
        data: Some(Value::Object(state)),
        ..DomInstruction::new(Op::Store)
    }
}

fn keyed(key: &str, value: Value) -> Map<String, Value> {
    let mut map = Map::new();
    let _ = map.insert(key.to_owned(), value);
    map
}

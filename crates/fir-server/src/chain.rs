//! Priority-ordered request handler chain.
//!
//! Each inbound request for a route is offered to the handlers in ascending
//! priority. The first handler that accepts it answers; a handler may also
//! hand the request back for the next one to try.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{FromRequestParts, RawPathParams, Request};
use axum::http::header::{ACCEPT, CONNECTION, CONTENT_TYPE, LOCATION, UPGRADE};
use axum::http::request::Parts;
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{Html, IntoResponse, Json, Response};
use fir_core::{ConnectionId, Event, FirError, RequestId, SessionId};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::context::RequestInfo;
use crate::dispatch::{DispatchMode, Reply, ReplyBody, dispatch, error_reply};
use crate::route::{ResponseFormat, Route};
use crate::server::App;
use crate::websocket::run_ws_session;

/// Header naming the WebSocket connection an HTTP event belongs to.
pub const CONNECTION_ID_HEADER: &str = "x-fir-connection-id";

/// Query parameter or form field carrying a form event's id.
const FORM_EVENT_PARAM: &str = "event";
const FORM_ID_FIELD: &str = "id";

const JSON: &str = "application/json";
const FORM: &str = "application/x-www-form-urlencoded";

/// One way of turning a request into an event.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Name for logs.
    fn name(&self) -> &'static str;

    /// Lower runs first.
    fn priority(&self) -> i32;

    /// Whether this handler takes the request.
    fn can_handle(&self, parts: &Parts, route: &Route) -> bool;

    /// Answer the request, or give it back for the next handler.
    async fn handle(
        &self,
        request: Request,
        route: Arc<Route>,
        app: &App,
    ) -> Result<Response, Request>;
}

/// Handlers sorted by priority.
pub struct HandlerChain {
    handlers: Vec<Box<dyn RequestHandler>>,
}

impl Default for HandlerChain {
    fn default() -> Self {
        Self::new(vec![
            Box::new(WebSocketHandler),
            Box::new(JsonEventHandler),
            Box::new(FormEventHandler),
            Box::new(LoadHandler),
        ])
    }
}

impl HandlerChain {
    /// Chain over `handlers`, sorted once (stable for equal priorities).
    pub fn new(mut handlers: Vec<Box<dyn RequestHandler>>) -> Self {
        handlers.sort_by_key(|h| h.priority());
        Self { handlers }
    }

    /// Handler names in the order they are tried.
    pub fn names(&self) -> Vec<&'static str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }

    /// Offer `request` to each handler in turn.
    pub async fn handle(&self, request: Request, route: Arc<Route>, app: &App) -> Response {
        let mut request = request;
        for handler in &self.handlers {
            let (parts, body) = request.into_parts();
            let accepted = handler.can_handle(&parts, &route);
            request = Request::from_parts(parts, body);
            if !accepted {
                continue;
            }
            debug!(handler = handler.name(), route = route.id(), "request classified");
            match handler.handle(request, Arc::clone(&route), app).await {
                Ok(response) => return response,
                Err(returned) => request = returned,
            }
        }
        unmatched(&request)
    }
}

fn unmatched(request: &Request) -> Response {
    let status = if request.method() == Method::POST
        && !content_type_is(request.headers(), JSON)
        && !content_type_is(request.headers(), FORM)
    {
        StatusCode::UNSUPPORTED_MEDIA_TYPE
    } else {
        StatusCode::METHOD_NOT_ALLOWED
    };
    debug!(method = %request.method(), path = request.uri().path(), %status, "no handler matched");
    status.into_response()
}

/// Upgrades to a WebSocket whose frames are events.
pub struct WebSocketHandler;

#[async_trait]
impl RequestHandler for WebSocketHandler {
    fn name(&self) -> &'static str {
        "websocket"
    }

    fn priority(&self) -> i32 {
        5
    }

    fn can_handle(&self, parts: &Parts, route: &Route) -> bool {
        route.websocket_enabled()
            && parts.method == Method::GET
            && header_has_token(&parts.headers, CONNECTION.as_str(), "upgrade")
            && header_has_token(&parts.headers, UPGRADE.as_str(), "websocket")
    }

    async fn handle(
        &self,
        request: Request,
        route: Arc<Route>,
        app: &App,
    ) -> Result<Response, Request> {
        let (mut parts, _body) = request.into_parts();
        let upgrade = match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
            Ok(upgrade) => upgrade,
            Err(rejection) => return Ok(rejection.into_response()),
        };
        let info = request_info(&mut parts, &route, app).await;
        let app = app.clone();
        let max_message_size = app.config().max_message_size;
        Ok(upgrade
            .max_message_size(max_message_size)
            .on_upgrade(move |socket| run_ws_session(socket, app, route, info)))
    }
}

/// `POST` with a JSON `{id, params}` body.
pub struct JsonEventHandler;

#[async_trait]
impl RequestHandler for JsonEventHandler {
    fn name(&self) -> &'static str {
        "json_event"
    }

    fn priority(&self) -> i32 {
        10
    }

    fn can_handle(&self, parts: &Parts, route: &Route) -> bool {
        route.has_event_handlers()
            && parts.method == Method::POST
            && content_type_is(&parts.headers, JSON)
    }

    async fn handle(
        &self,
        request: Request,
        route: Arc<Route>,
        app: &App,
    ) -> Result<Response, Request> {
        let (mut parts, body) = request.into_parts();
        let info = request_info(&mut parts, &route, app).await;
        let Ok(bytes) = axum::body::to_bytes(body, app.config().max_message_size).await else {
            return Ok(StatusCode::PAYLOAD_TOO_LARGE.into_response());
        };

        let reply = match Event::decode(&bytes) {
            Ok(event) => {
                dispatch(
                    &route,
                    event,
                    info.clone(),
                    DispatchMode::Patch,
                    app.config().handler_timeout(),
                )
                .await
            }
            Err(err) => {
                debug!(error = %err, "invalid event body");
                error_reply(&route, &err, DispatchMode::Patch)
            }
        };
        app.publish_reply(&route, &reply, &info);
        Ok(reply_response(reply, route.format(), &parts.headers))
    }
}

/// `POST` with an urlencoded form body.
///
/// The event id comes from `?event=` or the `id` field. Browsers that accept
/// HTML get a full page back; script clients get instructions.
pub struct FormEventHandler;

#[async_trait]
impl RequestHandler for FormEventHandler {
    fn name(&self) -> &'static str {
        "form_event"
    }

    fn priority(&self) -> i32 {
        20
    }

    fn can_handle(&self, parts: &Parts, route: &Route) -> bool {
        route.has_event_handlers()
            && parts.method == Method::POST
            && content_type_is(&parts.headers, FORM)
    }

    async fn handle(
        &self,
        request: Request,
        route: Arc<Route>,
        app: &App,
    ) -> Result<Response, Request> {
        let (mut parts, body) = request.into_parts();
        let info = request_info(&mut parts, &route, app).await;
        let Ok(bytes) = axum::body::to_bytes(body, app.config().max_message_size).await else {
            return Ok(StatusCode::PAYLOAD_TOO_LARGE.into_response());
        };
        let mode = if accepts_html(&parts.headers) {
            DispatchMode::Page
        } else {
            DispatchMode::Patch
        };

        let reply = match form_event(&bytes, info.query_param(FORM_EVENT_PARAM)) {
            Ok(event) => {
                dispatch(&route, event, info.clone(), mode, app.config().handler_timeout()).await
            }
            Err(err) => {
                debug!(error = %err, "invalid form body");
                error_reply(&route, &err, mode)
            }
        };
        app.publish_reply(&route, &reply, &info);
        Ok(reply_response(reply, route.format(), &parts.headers))
    }
}

/// `GET` page load through the route's onLoad handler.
pub struct LoadHandler;

#[async_trait]
impl RequestHandler for LoadHandler {
    fn name(&self) -> &'static str {
        "load"
    }

    fn priority(&self) -> i32 {
        50
    }

    fn can_handle(&self, parts: &Parts, route: &Route) -> bool {
        route.has_on_load() && (parts.method == Method::GET || parts.method == Method::HEAD)
    }

    async fn handle(
        &self,
        request: Request,
        route: Arc<Route>,
        app: &App,
    ) -> Result<Response, Request> {
        if app.config().dev_mode {
            if let Err(err) = route.templates().reload() {
                warn!(route = route.id(), error = %err, "template reload failed, serving previous set");
            }
        }
        let (mut parts, _body) = request.into_parts();
        let info = request_info(&mut parts, &route, app).await;
        let reply = dispatch(
            &route,
            Event::load(),
            info,
            DispatchMode::Page,
            app.config().handler_timeout(),
        )
        .await;
        Ok(reply_response(reply, ResponseFormat::Html, &parts.headers))
    }
}

/// Build the [`RequestInfo`] for a request on `route`.
///
/// A [`CONNECTION_ID_HEADER`] is honored only when it names a live
/// connection of the request's own session.
pub async fn request_info(parts: &mut Parts, route: &Route, app: &App) -> RequestInfo {
    let path = parts.uri.path().to_owned();
    let path_params = match route.path_params_for(&path) {
        Some(params) => params,
        None => RawPathParams::from_request_parts(parts, &())
            .await
            .map(|params| {
                params
                    .iter()
                    .map(|(k, v)| (k.to_owned(), v.to_owned()))
                    .collect()
            })
            .unwrap_or_default(),
    };
    let session_id = parts.extensions.get::<SessionId>().cloned().unwrap_or_default();
    let connection_id = parts
        .headers
        .get(CONNECTION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(ConnectionId::from)
        .filter(|id| {
            let owned = app.connections().is_owned_by(id, &session_id);
            if !owned {
                debug!(connection_id = %id, "ignoring connection id from another session");
            }
            owned
        });
    RequestInfo {
        path,
        query: parts.uri.query().map(str::to_owned),
        path_params,
        session_id,
        connection_id,
        request_id: RequestId::new(),
    }
}

/// Decode an urlencoded body into a form event. Repeated fields become arrays.
pub fn form_event(body: &[u8], event_param: Option<String>) -> Result<Event, FirError> {
    let pairs: Vec<(String, String)> = serde_urlencoded::from_bytes(body)
        .map_err(|e| FirError::protocol(format!("invalid form body: {e}")))?;

    let mut id = event_param.filter(|id| !id.trim().is_empty());
    let mut params = Map::new();
    for (key, value) in pairs {
        if key == FORM_ID_FIELD && id.is_none() {
            id = Some(value);
            continue;
        }
        match params.get_mut(&key) {
            Some(Value::Array(values)) => values.push(Value::String(value)),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, Value::String(value)]);
            }
            None => {
                let _ = params.insert(key, Value::String(value));
            }
        }
    }

    match id {
        Some(id) if !id.trim().is_empty() => Ok(Event::form(id, Value::Object(params))),
        _ => Err(FirError::protocol("form event id is missing")),
    }
}

/// Encode a dispatch reply as an HTTP response.
pub fn reply_response(reply: Reply, format: ResponseFormat, headers: &HeaderMap) -> Response {
    let Reply { status, body } = reply;
    match body {
        ReplyBody::Page(html) => (status, Html(html)).into_response(),
        ReplyBody::Redirect(url) => (StatusCode::SEE_OTHER, [(LOCATION, url)]).into_response(),
        ReplyBody::Instructions(list) => {
            let as_html = match format {
                ResponseFormat::Json => false,
                ResponseFormat::Html => true,
                ResponseFormat::Negotiate => accepts_html(headers),
            };
            if as_html {
                let html: String = list.iter().filter_map(|i| i.html.as_deref()).collect();
                (status, Html(html)).into_response()
            } else {
                (status, Json(list)).into_response()
            }
        }
    }
}

/// Whether the media type of `Content-Type` is `expected`.
fn content_type_is(headers: &HeaderMap, expected: &str) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .is_some_and(|media| media.trim().eq_ignore_ascii_case(expected))
}

/// Whether the comma-separated header `name` contains `token`.
fn header_has_token(headers: &HeaderMap, name: &str, token: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|t| t.trim().eq_ignore_ascii_case(token))
}

/// Whether `Accept` lists `text/html` ahead of JSON.
fn accepts_html(headers: &HeaderMap) -> bool {
    let Some(accept) = headers.get(ACCEPT).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    let accept = accept.to_ascii_lowercase();
    match (accept.find("text/html"), accept.find(JSON)) {
        (Some(html), Some(json)) => html < json,
        (Some(_), None) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use axum::http::HeaderValue;
    use fir_core::{DomInstruction, Op};

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            let _ = map.append(*k, HeaderValue::from_static(v));
        }
        map
    }

    struct Named(&'static str, i32);

    #[async_trait]
    impl RequestHandler for Named {
        fn name(&self) -> &'static str {
            self.0
        }
        fn priority(&self) -> i32 {
            self.1
        }
        fn can_handle(&self, _parts: &Parts, _route: &Route) -> bool {
            false
        }
        async fn handle(
            &self,
            request: Request,
            _route: Arc<Route>,
            _app: &App,
        ) -> Result<Response, Request> {
            Err(request)
        }
    }

    #[test]
    fn default_chain_order() {
        assert_eq!(
            HandlerChain::default().names(),
            vec!["websocket", "json_event", "form_event", "load"]
        );
    }

    #[test]
    fn sorted_once_and_stable() {
        let chain = HandlerChain::new(vec![
            Box::new(Named("c", 30)),
            Box::new(Named("a", 10)),
            Box::new(Named("b1", 20)),
            Box::new(Named("b2", 20)),
        ]);
        assert_eq!(chain.names(), vec!["a", "b1", "b2", "c"]);
    }

    #[test]
    fn content_type_matching() {
        let h = headers(&[("content-type", "application/json; charset=utf-8")]);
        assert!(content_type_is(&h, JSON));
        assert!(!content_type_is(&h, FORM));
        assert!(!content_type_is(&HeaderMap::new(), JSON));
    }

    #[test]
    fn upgrade_tokens() {
        let h = headers(&[("connection", "keep-alive, Upgrade"), ("upgrade", "websocket")]);
        assert!(header_has_token(&h, "connection", "upgrade"));
        assert!(header_has_token(&h, "upgrade", "websocket"));
        assert!(!header_has_token(&h, "connection", "close"));
    }

    #[test]
    fn html_preference() {
        assert!(accepts_html(&headers(&[(
            "accept",
            "text/html,application/xhtml+xml,*/*;q=0.8"
        )])));
        assert!(!accepts_html(&headers(&[("accept", "application/json, text/html")])));
        assert!(!accepts_html(&headers(&[("accept", "*/*")])));
        assert!(!accepts_html(&HeaderMap::new()));
    }

    #[test]
    fn form_event_from_field_or_query() {
        let event = form_event(b"id=create&text=milk", None).unwrap();
        assert_eq!(event.id, "create");
        assert!(event.is_form);
        assert_eq!(event.params, serde_json::json!({"text": "milk"}));

        let event = form_event(b"id=x&text=milk", Some("update".into())).unwrap();
        assert_eq!(event.id, "update");
        // with the id from the query, `id` is an ordinary field
        assert_eq!(event.params["id"], "x");
    }

    #[test]
    fn form_event_repeated_fields() {
        let event = form_event(b"id=tag&t=a&t=b&t=c", None).unwrap();
        assert_eq!(event.params["t"], serde_json::json!(["a", "b", "c"]));
    }

    #[test]
    fn form_event_requires_id() {
        assert_matches!(form_event(b"text=milk", None), Err(FirError::Protocol { .. }));
        assert_matches!(form_event(b"id=&text=milk", None), Err(FirError::Protocol { .. }));
    }

    fn instructions() -> Reply {
        let morph = DomInstruction {
            selector: Some("#a".into()),
            html: Some("<p>a</p>".into()),
            ..DomInstruction::new(Op::Morph)
        };
        let append = DomInstruction {
            selector: Some("#b".into()),
            html: Some("<li>b</li>".into()),
            ..DomInstruction::new(Op::Append)
        };
        Reply {
            status: StatusCode::OK,
            body: ReplyBody::Instructions(vec![morph, DomInstruction::new(Op::Reload), append]),
        }
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), 100_000).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn response_formats() {
        let json = reply_response(instructions(), ResponseFormat::Json, &HeaderMap::new());
        assert_eq!(
            json.headers().get(CONTENT_TYPE).unwrap(),
            "application/json"
        );
        let parsed: Value = serde_json::from_str(&body_text(json).await).unwrap();
        assert_eq!(parsed[1], serde_json::json!({"op": "reload"}));

        let html = reply_response(instructions(), ResponseFormat::Html, &HeaderMap::new());
        assert_eq!(body_text(html).await, "<p>a</p><li>b</li>");

        let negotiated = reply_response(
            instructions(),
            ResponseFormat::Negotiate,
            &headers(&[("accept", "text/html")]),
        );
        assert_eq!(body_text(negotiated).await, "<p>a</p><li>b</li>");
    }

    #[test]
    fn redirect_response() {
        let reply = Reply {
            status: StatusCode::OK,
            body: ReplyBody::Redirect("/done".into()),
        };
        let response = reply_response(reply, ResponseFormat::Json, &HeaderMap::new());
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers().get(LOCATION).unwrap(), "/done");
    }
}

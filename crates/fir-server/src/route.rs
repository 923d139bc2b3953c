//! Routes: templates, event handlers and channel scoping for one page.
//!
//! A [`Route`] is built once through [`RouteBuilder`] and never mutated
//! afterwards; the only moving part is its template handle, which dev mode
//! reloads in place.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use fir_core::{FirError, LOAD_EVENT, Outcome, Result};
use fir_template::{RouteTemplates, TemplateCache, TemplateConfig, TemplateLoader, TemplateValue};

use crate::context::{RequestInfo, RouteContext};

/// A user handler for one event id.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle one dispatch.
    async fn handle(&self, ctx: RouteContext) -> Outcome;
}

/// Adapter turning an async closure into an [`EventHandler`].
pub struct HandlerFn<F>(pub F);

#[async_trait]
impl<F, Fut, O> EventHandler for HandlerFn<F>
where
    F: Fn(RouteContext) -> Fut + Send + Sync,
    Fut: Future<Output = O> + Send + 'static,
    O: Into<Outcome> + 'static,
{
    async fn handle(&self, ctx: RouteContext) -> Outcome {
        (self.0)(ctx).await.into()
    }
}

struct NoopHandler;

#[async_trait]
impl EventHandler for NoopHandler {
    async fn handle(&self, _ctx: RouteContext) -> Outcome {
        Outcome::None
    }
}

/// Derives a connection's channel from the route id and request.
pub type ChannelFn = Arc<dyn Fn(&str, &RequestInfo) -> Option<String> + Send + Sync>;

/// Extracts path parameters from the request path.
pub type PathParamsFn = Arc<dyn Fn(&str) -> BTreeMap<String, String> + Send + Sync>;

/// How non-WebSocket event replies are encoded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ResponseFormat {
    /// JSON instruction array.
    #[default]
    Json,
    /// Concatenated instruction HTML.
    Html,
    /// HTML when `Accept` prefers `text/html`, JSON otherwise.
    Negotiate,
}

/// Default channel: one per route and session.
pub fn default_channel(route_id: &str, request: &RequestInfo) -> String {
    format!("{route_id}:{}", request.session_id)
}

/// One page: its templates, handlers and broadcast scope.
pub struct Route {
    id: String,
    path: String,
    templates: RouteTemplates,
    on_load: Option<Arc<dyn EventHandler>>,
    handlers: HashMap<String, Arc<dyn EventHandler>>,
    channel: Option<ChannelFn>,
    extra_channels: Vec<String>,
    path_params: Option<PathParamsFn>,
    cookie_name: Option<String>,
    websocket: bool,
    broadcast: bool,
    morph_selector: String,
    format: ResponseFormat,
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("events", &self.event_ids())
            .field("websocket", &self.websocket)
            .field("broadcast", &self.broadcast)
            .finish_non_exhaustive()
    }
}

impl Route {
    /// Start building a route served at `path`.
    pub fn builder(id: impl Into<String>, path: impl Into<String>) -> RouteBuilder {
        RouteBuilder::new(id, path)
    }

    /// Route id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Mount path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Template handle.
    pub fn templates(&self) -> &RouteTemplates {
        &self.templates
    }

    /// Handler for `event_id`; `load` resolves to the onLoad handler.
    pub fn handler(&self, event_id: &str) -> Option<&Arc<dyn EventHandler>> {
        if event_id == LOAD_EVENT {
            self.on_load.as_ref()
        } else {
            self.handlers.get(event_id)
        }
    }

    /// Whether the route answers page loads.
    pub fn has_on_load(&self) -> bool {
        self.on_load.is_some()
    }

    /// Whether the route has any event handlers besides onLoad.
    pub fn has_event_handlers(&self) -> bool {
        !self.handlers.is_empty()
    }

    /// Registered event ids, sorted.
    pub fn event_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Channels a connection for `request` subscribes to and event replies
    /// are published on.
    pub fn channels_for(&self, request: &RequestInfo) -> Vec<String> {
        let mut channels = Vec::with_capacity(1 + self.extra_channels.len());
        let derived = match &self.channel {
            Some(channel) => channel(&self.id, request),
            None => Some(default_channel(&self.id, request)),
        };
        channels.extend(derived);
        for extra in &self.extra_channels {
            if !channels.contains(extra) {
                channels.push(extra.clone());
            }
        }
        channels
    }

    /// Path parameters for `path`, if the route overrides extraction.
    pub fn path_params_for(&self, path: &str) -> Option<BTreeMap<String, String>> {
        self.path_params.as_ref().map(|f| f(path))
    }

    /// Session cookie name override.
    pub fn cookie_name(&self) -> Option<&str> {
        self.cookie_name.as_deref()
    }

    /// Whether the route accepts WebSocket connections.
    pub fn websocket_enabled(&self) -> bool {
        self.websocket
    }

    /// Whether event replies are published to other connections.
    pub fn broadcast_enabled(&self) -> bool {
        self.websocket && self.broadcast
    }

    /// Selector morphed with re-rendered content.
    pub fn morph_selector(&self) -> &str {
        &self.morph_selector
    }

    /// Reply format for HTTP events.
    pub fn format(&self) -> ResponseFormat {
        self.format
    }
}

/// Builder for [`Route`].
pub struct RouteBuilder {
    id: String,
    path: String,
    templates: TemplateConfig,
    extensions_set: bool,
    on_load: Option<Arc<dyn EventHandler>>,
    handlers: HashMap<String, Arc<dyn EventHandler>>,
    duplicates: Vec<String>,
    channel: Option<ChannelFn>,
    extra_channels: Vec<String>,
    path_params: Option<PathParamsFn>,
    cookie_name: Option<String>,
    websocket: bool,
    broadcast: bool,
    morph_selector: String,
    format: ResponseFormat,
}

impl RouteBuilder {
    /// New builder with WebSocket and broadcast enabled.
    pub fn new(id: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            templates: TemplateConfig::default(),
            extensions_set: false,
            on_load: None,
            handlers: HashMap::new(),
            duplicates: Vec::new(),
            channel: None,
            extra_channels: Vec::new(),
            path_params: None,
            cookie_name: None,
            websocket: true,
            broadcast: true,
            morph_selector: "body".into(),
            format: ResponseFormat::default(),
        }
    }

    /// Route id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Page layout: a loader path or inline markup.
    #[must_use]
    pub fn layout(mut self, layout: impl Into<String>) -> Self {
        self.templates.layout = Some(layout.into());
        self
    }

    /// Page content: a loader path or inline markup.
    #[must_use]
    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.templates.content = Some(content.into());
        self
    }

    /// Name the layout includes the content under.
    #[must_use]
    pub fn layout_content_name(mut self, name: impl Into<String>) -> Self {
        self.templates.layout_content_name = name.into();
        self
    }

    /// Error page layout.
    #[must_use]
    pub fn error_layout(mut self, layout: impl Into<String>) -> Self {
        self.templates.error_layout = Some(layout.into());
        self
    }

    /// Error content.
    #[must_use]
    pub fn error_content(mut self, content: impl Into<String>) -> Self {
        self.templates.error_content = Some(content.into());
        self
    }

    /// Partial files or directories.
    #[must_use]
    pub fn partials<I, S>(mut self, partials: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.templates.partials.extend(partials.into_iter().map(Into::into));
        self
    }

    /// Extensions picked up from partial directories.
    #[must_use]
    pub fn extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.templates.extensions = extensions.into_iter().map(Into::into).collect();
        self.extensions_set = true;
        self
    }

    /// Use `extensions` unless the route set its own.
    pub(crate) fn default_extensions(mut self, extensions: &[String]) -> Self {
        if !self.extensions_set {
            self.templates.extensions = extensions.to_vec();
        }
        self
    }

    /// Template function, overriding a default of the same name.
    #[must_use]
    pub fn function(mut self, name: impl Into<String>, function: TemplateValue) -> Self {
        let _ = self.templates.functions.insert(name.into(), function.into());
        self
    }

    /// Page load handler.
    #[must_use]
    pub fn on_load<F, Fut, O>(self, handler: F) -> Self
    where
        F: Fn(RouteContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = O> + Send + 'static,
        O: Into<Outcome> + 'static,
    {
        self.on_load_handler(HandlerFn(handler))
    }

    /// Page load handler from an [`EventHandler`] value.
    #[must_use]
    pub fn on_load_handler(mut self, handler: impl EventHandler + 'static) -> Self {
        self.on_load = Some(Arc::new(handler));
        self
    }

    /// Handler for `event_id`.
    #[must_use]
    pub fn on_event<F, Fut, O>(self, event_id: impl Into<String>, handler: F) -> Self
    where
        F: Fn(RouteContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = O> + Send + 'static,
        O: Into<Outcome> + 'static,
    {
        self.on_event_handler(event_id, HandlerFn(handler))
    }

    /// Handler for `event_id` from an [`EventHandler`] value.
    #[must_use]
    pub fn on_event_handler(
        mut self,
        event_id: impl Into<String>,
        handler: impl EventHandler + 'static,
    ) -> Self {
        let event_id = event_id.into();
        if self.handlers.contains_key(&event_id) {
            self.duplicates.push(event_id);
        } else {
            let _ = self.handlers.insert(event_id, Arc::new(handler));
        }
        self
    }

    /// Custom channel derivation; returning `None` subscribes only the extra channels.
    #[must_use]
    pub fn channel<F>(mut self, channel: F) -> Self
    where
        F: Fn(&str, &RequestInfo) -> Option<String> + Send + Sync + 'static,
    {
        self.channel = Some(Arc::new(channel));
        self
    }

    /// Static channel every connection of this route also joins.
    #[must_use]
    pub fn extra_channel(mut self, channel: impl Into<String>) -> Self {
        self.extra_channels.push(channel.into());
        self
    }

    /// Custom path parameter extraction.
    #[must_use]
    pub fn path_params<F>(mut self, extract: F) -> Self
    where
        F: Fn(&str) -> BTreeMap<String, String> + Send + Sync + 'static,
    {
        self.path_params = Some(Arc::new(extract));
        self
    }

    /// Session cookie name for this route.
    #[must_use]
    pub fn cookie_name(mut self, name: impl Into<String>) -> Self {
        self.cookie_name = Some(name.into());
        self
    }

    /// Accept WebSocket connections (default `true`).
    #[must_use]
    pub fn websocket(mut self, enabled: bool) -> Self {
        self.websocket = enabled;
        self
    }

    /// Publish event replies to other connections (default `true`).
    #[must_use]
    pub fn broadcast(mut self, enabled: bool) -> Self {
        self.broadcast = enabled;
        self
    }

    /// Selector re-rendered content is morphed into (default `"body"`).
    #[must_use]
    pub fn morph_selector(mut self, selector: impl Into<String>) -> Self {
        self.morph_selector = selector.into();
        self
    }

    /// HTTP event reply format.
    #[must_use]
    pub fn format(mut self, format: ResponseFormat) -> Self {
        self.format = format;
        self
    }

    /// Validate and compile templates.
    pub fn build(
        self,
        loader: Arc<dyn TemplateLoader>,
        cache: Arc<TemplateCache>,
    ) -> Result<Route> {
        if self.id.trim().is_empty() {
            return Err(FirError::config("route id is empty"));
        }
        if !self.path.starts_with('/') {
            return Err(FirError::config(format!(
                "route '{}': path '{}' must start with '/'",
                self.id, self.path
            )));
        }
        if let Some(duplicate) = self.duplicates.first() {
            return Err(FirError::config(format!(
                "route '{}': duplicate handler for event '{duplicate}'",
                self.id
            )));
        }
        if self.handlers.contains_key(LOAD_EVENT) {
            return Err(FirError::config(format!(
                "route '{}': '{LOAD_EVENT}' is reserved for the onLoad handler",
                self.id
            )));
        }

        let has_page = self.templates.has_page();
        let templates = RouteTemplates::load(self.id.clone(), self.templates, loader, cache)?;
        let on_load = match self.on_load {
            Some(handler) => Some(handler),
            None if has_page => Some(Arc::new(NoopHandler) as Arc<dyn EventHandler>),
            None => None,
        };

        Ok(Route {
            id: self.id,
            path: self.path,
            templates,
            on_load,
            handlers: self.handlers,
            channel: self.channel,
            extra_channels: self.extra_channels,
            path_params: self.path_params,
            cookie_name: self.cookie_name,
            websocket: self.websocket,
            broadcast: self.broadcast,
            morph_selector: self.morph_selector,
            format: self.format,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use fir_core::{Event, SessionId};
    use fir_template::MemoryLoader;

    fn build(builder: RouteBuilder) -> Result<Route> {
        builder.build(Arc::new(MemoryLoader::new()), Arc::new(TemplateCache::default()))
    }

    fn request(session: &str) -> RequestInfo {
        RequestInfo::new("/").with_session(SessionId::from(session))
    }

    #[test]
    fn defaults() {
        let route = build(Route::builder("home", "/").content("<p>hi</p>")).unwrap();
        assert_eq!(route.id(), "home");
        assert_eq!(route.morph_selector(), "body");
        assert_eq!(route.format(), ResponseFormat::Json);
        assert!(route.websocket_enabled());
        assert!(route.broadcast_enabled());
        // content without onLoad gets the no-op default
        assert!(route.has_on_load());
        assert!(!route.has_event_handlers());
    }

    #[test]
    fn no_page_no_default_on_load() {
        let route = build(Route::builder("api", "/api").on_event("ping", |_ctx| async {
            Outcome::None
        }))
        .unwrap();
        assert!(!route.has_on_load());
        assert!(route.handler("load").is_none());
        assert!(route.handler("ping").is_some());
    }

    #[test]
    fn duplicate_event_fails_build() {
        let result = build(
            Route::builder("todos", "/")
                .on_event("create", |_ctx| async { Outcome::None })
                .on_event("create", |_ctx| async { Outcome::None }),
        );
        assert_matches!(result, Err(FirError::Config { message }) if message.contains("create"));
    }

    #[test]
    fn load_is_reserved() {
        let result = build(Route::builder("x", "/").on_event("load", |_ctx| async { Outcome::None }));
        assert_matches!(result, Err(FirError::Config { .. }));
    }

    #[test]
    fn path_must_be_absolute() {
        let result = build(Route::builder("x", "relative"));
        assert_matches!(result, Err(FirError::Config { .. }));
    }

    #[test]
    fn template_errors_fail_build() {
        let result = build(Route::builder("x", "/").content(r#"<p x-fir-nope="a">"#));
        assert_matches!(result, Err(FirError::Template { .. }));
    }

    #[test]
    fn default_channel_is_route_and_session() {
        let route = build(Route::builder("counter", "/").content("c")).unwrap();
        assert_eq!(route.channels_for(&request("s1")), vec!["counter:s1"]);
    }

    #[test]
    fn custom_and_extra_channels() {
        let route = build(
            Route::builder("chat", "/chat")
                .content("c")
                .channel(|id, req| req.query_param("room").map(|room| format!("{id}:{room}")))
                .extra_channel("global")
                .extra_channel("global"),
        )
        .unwrap();

        let mut req = request("s1");
        req.query = Some("room=7".into());
        assert_eq!(route.channels_for(&req), vec!["chat:7", "global"]);
        // no room: only the extra channel
        assert_eq!(route.channels_for(&request("s1")), vec!["global"]);
    }

    #[test]
    fn websocket_off_disables_broadcast() {
        let route = build(Route::builder("x", "/").content("c").websocket(false)).unwrap();
        assert!(!route.websocket_enabled());
        assert!(!route.broadcast_enabled());
    }

    #[test]
    fn event_ids_sorted() {
        let route = build(
            Route::builder("x", "/")
                .on_event("b", |_ctx| async { Outcome::None })
                .on_event("a", |_ctx| async { Outcome::None }),
        )
        .unwrap();
        assert_eq!(route.event_ids(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn closure_handlers_convert_outcomes() {
        let route = Arc::new(
            build(Route::builder("x", "/").on_event("fail", |_ctx| async {
                Err::<Outcome, _>(FirError::field("name", "is required"))
            }))
            .unwrap(),
        );
        let handler = route.handler("fail").cloned().unwrap();
        let ctx = RouteContext::new(Event::new("fail", serde_json::Value::Null), request("s"), route);
        assert_matches!(handler.handle(ctx).await, Outcome::FieldErrors(e) if e.contains_key("name"));
    }
}

//! `App`: route registry, session binding and the Axum server.

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::{Request, State};
use axum::response::{Json, Response};
use axum::routing::{any, get};
use fir_core::{FirError, PatchList, Result};
use fir_pubsub::{Broker, InMemoryBroker, Message, RedisBroker};
use fir_settings::{BrokerKind, FirSettings};
use fir_template::{FsLoader, TemplateCache, TemplateLoader, render_patches};
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use parking_lot::RwLock;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::chain::HandlerChain;
use crate::config::ServerConfig;
use crate::context::RequestInfo;
use crate::dispatch::Reply;
use crate::health::{self, HealthResponse};
use crate::metrics::{self as fir_metrics, METRICS_PATH, PUBLISH_ERRORS_TOTAL, PUBLISH_TOTAL};
use crate::route::{Route, RouteBuilder};
use crate::session::SessionKeys;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::ConnectionManager;

/// Path served by the health endpoint.
pub const HEALTH_PATH: &str = "/health";

/// A fir application: routes plus everything needed to serve them.
///
/// Cheap to clone; every clone shares the same routes, connections and
/// broker.
#[derive(Clone)]
pub struct App {
    inner: Arc<AppInner>,
}

struct AppInner {
    config: ServerConfig,
    sessions: SessionKeys,
    chain: HandlerChain,
    connections: Arc<ConnectionManager>,
    loader: Arc<dyn TemplateLoader>,
    cache: Arc<TemplateCache>,
    routes: RwLock<Vec<Arc<Route>>>,
    metrics: RwLock<Option<PrometheusHandle>>,
    shutdown: ShutdownCoordinator,
    start_time: Instant,
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("bind_addr", &self.inner.config.bind_addr())
            .field("broker", &self.inner.connections.broker().name())
            .field("routes", &self.inner.routes.read().len())
            .finish_non_exhaustive()
    }
}

impl App {
    /// App with the default handler chain.
    pub fn new(
        config: ServerConfig,
        broker: Arc<dyn Broker>,
        loader: Arc<dyn TemplateLoader>,
    ) -> Result<Self> {
        Self::with_chain(config, broker, loader, HandlerChain::default())
    }

    /// App with a custom handler chain.
    pub fn with_chain(
        config: ServerConfig,
        broker: Arc<dyn Broker>,
        loader: Arc<dyn TemplateLoader>,
        chain: HandlerChain,
    ) -> Result<Self> {
        let sessions = SessionKeys::from_config(&config.session)?;
        Ok(Self {
            inner: Arc::new(AppInner {
                config,
                sessions,
                chain,
                connections: Arc::new(ConnectionManager::new(broker)),
                loader,
                cache: Arc::new(TemplateCache::default()),
                routes: RwLock::new(Vec::new()),
                metrics: RwLock::new(None),
                shutdown: ShutdownCoordinator::new(),
                start_time: Instant::now(),
            }),
        })
    }

    /// App from loaded settings: logging, the configured broker, templates
    /// read from the public directory and, when enabled, `/metrics`.
    pub async fn from_settings(settings: &FirSettings) -> Result<Self> {
        fir_core::logging::init(&settings.logging.level, settings.logging.json);
        let buffer = settings.pubsub.subscriber_buffer;
        let broker: Arc<dyn Broker> = match settings.pubsub.broker {
            BrokerKind::Memory => Arc::new(InMemoryBroker::new(buffer)),
            BrokerKind::Redis => Arc::new(RedisBroker::connect(&settings.pubsub.redis_url, buffer).await?),
        };
        let loader = Arc::new(FsLoader::new(&settings.templates.public_dir));
        info!(
            broker = broker.name(),
            public_dir = %settings.templates.public_dir,
            "app configured"
        );
        let app = Self::new(ServerConfig::from(settings), broker, loader)?;
        if app.config().metrics {
            app.enable_metrics(fir_metrics::install_recorder()?);
        }
        Ok(app)
    }

    /// Serve `/metrics` from `handle` on routers built after this call.
    pub fn enable_metrics(&self, handle: PrometheusHandle) {
        *self.inner.metrics.write() = Some(handle);
    }

    /// Compile and register a route.
    ///
    /// Fails on template errors, a reserved or malformed path, or an id or
    /// path already taken.
    pub fn route(&self, builder: RouteBuilder) -> Result<Arc<Route>> {
        let route = builder
            .default_extensions(&self.inner.config.template_extensions)
            .build(Arc::clone(&self.inner.loader), Arc::clone(&self.inner.cache))?;
        check_path(&route)?;

        let mut routes = self.inner.routes.write();
        if let Some(taken) = routes
            .iter()
            .find(|r| r.id() == route.id() || r.path() == route.path())
        {
            return Err(FirError::config(format!(
                "route '{}' at '{}' conflicts with route '{}' at '{}'",
                route.id(),
                route.path(),
                taken.id(),
                taken.path()
            )));
        }
        let route = Arc::new(route);
        routes.push(Arc::clone(&route));
        info!(
            route = route.id(),
            path = route.path(),
            events = route.event_ids().len(),
            websocket = route.websocket_enabled(),
            "route registered"
        );
        Ok(route)
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// Registered routes, in registration order.
    pub fn routes(&self) -> Vec<Arc<Route>> {
        self.inner.routes.read().clone()
    }

    /// Route by id or mount path.
    pub fn find_route(&self, key: &str) -> Option<Arc<Route>> {
        self.inner
            .routes
            .read()
            .iter()
            .find(|r| r.id() == key || r.path() == key)
            .cloned()
    }

    /// Live WebSocket connections.
    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.inner.connections
    }

    /// Broker carrying broadcasts.
    pub fn broker(&self) -> &Arc<dyn Broker> {
        self.inner.connections.broker()
    }

    /// Compiled template cache shared by every route.
    pub fn template_cache(&self) -> &Arc<TemplateCache> {
        &self.inner.cache
    }

    /// Token cancelled when shutdown starts.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.token()
    }

    /// Stop accepting requests and close every WebSocket session.
    pub fn shutdown(&self) {
        info!("shutdown requested");
        self.inner.shutdown.shutdown();
    }

    /// Whether shutdown has started.
    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutdown.is_shutting_down()
    }

    /// Current health snapshot.
    pub fn health(&self) -> HealthResponse {
        health::health_check(
            self.inner.start_time,
            self.is_shutting_down(),
            self.inner.connections.connection_count(),
            self.inner.connections.channel_count(),
            self.inner.routes.read().len(),
        )
    }

    /// Render `patches` against `route`'s templates and publish them on
    /// `channel`. Every connection subscribed to the channel receives them.
    pub async fn publish(&self, route: &str, channel: &str, patches: &PatchList) -> Result<()> {
        let route = self
            .find_route(route)
            .ok_or_else(|| FirError::not_found(format!("route '{route}'")))?;
        let instructions = render_patches(&route.templates().current(), patches)?;
        let payload = serde_json::to_string(&instructions)?;
        self.broker().publish(channel, Message::new(payload)).await?;
        counter!(PUBLISH_TOTAL).increment(1);
        debug!(route = route.id(), channel, count = instructions.len(), "published");
        Ok(())
    }

    /// Publish a successful event reply on the channels of `request`.
    ///
    /// Runs in the background; the origin connection filters its own copy
    /// out on receipt.
    pub fn publish_reply(&self, route: &Arc<Route>, reply: &Reply, request: &RequestInfo) {
        if !route.broadcast_enabled() || !reply.is_publishable() {
            return;
        }
        let Some(instructions) = reply.instructions() else {
            return;
        };
        let payload = match serde_json::to_string(instructions) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(route = route.id(), error = %err, "failed to serialize reply for broadcast");
                return;
            }
        };
        let channels = route.channels_for(request);
        if channels.is_empty() {
            return;
        }

        let broker = Arc::clone(self.broker());
        let origin = request.origin().to_owned();
        let route_id = route.id().to_owned();
        drop(tokio::spawn(async move {
            for channel in channels {
                let message = Message::from_origin(origin.clone(), payload.clone());
                match broker.publish(&channel, message).await {
                    Ok(()) => counter!(PUBLISH_TOTAL).increment(1),
                    Err(err) => {
                        counter!(PUBLISH_ERRORS_TOTAL).increment(1);
                        warn!(route = %route_id, channel, error = %err, "broadcast publish failed");
                    }
                }
            }
        }));
    }

    /// Bind the session, run the handler chain, and set the cookie if new.
    async fn handle(&self, route: Arc<Route>, mut request: Request) -> Response {
        let binding = self
            .inner
            .sessions
            .resolve(request.headers(), route.cookie_name());
        let _ = request.extensions_mut().insert(binding.session_id.clone());
        let response = self.inner.chain.handle(request, route, self).await;
        binding.apply(response)
    }

    /// Router serving `/health`, `/metrics` when enabled, and every
    /// registered route.
    pub fn router(&self) -> Router {
        let mut router: Router<App> = Router::new().route(HEALTH_PATH, get(health_handler));
        if let Some(handle) = self.inner.metrics.read().clone() {
            router = router.merge(fir_metrics::metrics_router(handle));
        }
        for route in self.routes() {
            let path = route.path().to_owned();
            router = router.route(
                &path,
                any(move |State(app): State<App>, request: Request| {
                    let route = Arc::clone(&route);
                    async move { app.handle(route, request).await }
                }),
            );
        }
        router
            .layer(TraceLayer::new_for_http())
            .with_state(self.clone())
    }

    /// Serve on `listener` until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        let addr = listener.local_addr()?;
        info!(%addr, routes = self.inner.routes.read().len(), "fir server listening");
        let token = self.shutdown_token();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await?;
        info!("fir server stopped");
        Ok(())
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn listen(&self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.inner.config.bind_addr()).await?;
        self.serve(listener).await
    }
}

/// GET /health
async fn health_handler(State(app): State<App>) -> Json<HealthResponse> {
    Json(app.health())
}

fn check_path(route: &Route) -> Result<()> {
    if route.path() == HEALTH_PATH || route.path() == METRICS_PATH {
        return Err(FirError::config(format!(
            "route '{}': path '{}' is reserved",
            route.id(),
            route.path()
        )));
    }
    // axum captures are `{name}`; `:name` and `*name` segments are rejected
    if route
        .path()
        .split('/')
        .any(|segment| segment.starts_with(':') || segment.starts_with('*'))
    {
        return Err(FirError::config(format!(
            "route '{}': path '{}' must use {{name}} captures",
            route.id(),
            route.path()
        )));
    }
    Ok(())
}

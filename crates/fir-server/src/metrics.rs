//! Prometheus metrics recorder and `/metrics` endpoint handler.

use axum::Router;
use axum::extract::State;
use axum::routing::get;
use fir_core::FirError;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Path the Prometheus exposition is served on.
pub const METRICS_PATH: &str = "/metrics";

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render `/metrics`. Fails if another recorder
/// is already installed.
pub fn install_recorder() -> Result<PrometheusHandle, FirError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| FirError::config(format!("failed to install metrics recorder: {e}")))?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Router serving `GET /metrics` from `handle`; merge it into the app router.
pub fn metrics_router<S>(handle: PrometheusHandle) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new()
        .route(METRICS_PATH, get(metrics_handler))
        .with_state(handle)
}

async fn metrics_handler(State(handle): State<PrometheusHandle>) -> String {
    handle.render()
}

// Metric name constants to avoid typos across modules.

/// Events dispatched (counter, labels: route).
pub const EVENTS_TOTAL: &str = "fir_events_total";
/// Dispatches that ended in an error reply (counter, labels: route, code).
pub const EVENT_ERRORS_TOTAL: &str = "fir_event_errors_total";
/// Dispatch duration seconds (histogram, labels: route).
pub const EVENT_DURATION_SECONDS: &str = "fir_event_duration_seconds";
/// WebSocket connections opened (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "fir_ws_connections_total";
/// WebSocket disconnections (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "fir_ws_disconnections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "fir_ws_connections_active";
/// WebSocket connection lifetime seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "fir_ws_connection_duration_seconds";
/// Frames dropped because a connection's buffer was full (counter).
pub const WS_DROPPED_TOTAL: &str = "fir_ws_dropped_total";
/// Replies published to a broker (counter).
pub const PUBLISH_TOTAL: &str = "fir_publish_total";
/// Failed publishes (counter).
pub const PUBLISH_ERRORS_TOTAL: &str = "fir_publish_errors_total";

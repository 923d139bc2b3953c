//! WebSocket session lifecycle: one connected client from upgrade through
//! disconnect.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use fir_core::{ConnectionId, DomInstruction, Event, Op, RequestId};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use super::connection::ClientConnection;
use crate::context::RequestInfo;
use crate::dispatch::{DispatchMode, dispatch, error_reply};
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL,
};
use crate::route::Route;
use crate::server::App;

/// Client store the connection id is written to on connect.
pub const CONNECTION_STORE: &str = "fir_connection";

/// First frame sent on every connection.
pub fn connection_frame(id: &ConnectionId) -> Vec<DomInstruction> {
    vec![DomInstruction {
        name: Some(CONNECTION_STORE.to_owned()),
        data: Some(json!({ "id": id })),
        ..DomInstruction::new(Op::Store)
    }]
}

/// Run a WebSocket session for a connected client.
///
/// 1. Subscribes the connection to the route's channels
/// 2. Sends the connection id as the first frame
/// 3. Dispatches each inbound frame as one event, replying in order
/// 4. Forwards broadcasts and sends periodic pings, dropping unresponsive clients
/// 5. Releases every subscription on close, error or shutdown
#[instrument(skip_all, fields(connection_id, route = %route.id()))]
pub async fn run_ws_session(ws: WebSocket, app: App, route: Arc<Route>, mut request: RequestInfo) {
    let connection_id = ConnectionId::new();
    let _ = tracing::Span::current().record("connection_id", connection_id.as_str());
    request.connection_id = Some(connection_id.clone());

    let config = app.config().clone();
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (send_tx, mut send_rx) = mpsc::channel::<Arc<String>>(config.send_buffer.max(1));
    let connection = Arc::new(ClientConnection::new(
        connection_id.clone(),
        request.session_id.clone(),
        route.id(),
        send_tx,
    ));

    let channels = route.channels_for(&request);
    let guard = match app
        .connections()
        .register(Arc::clone(&connection), &channels)
        .await
    {
        Ok(guard) => guard,
        Err(err) => {
            warn!(error = %err, "failed to subscribe connection, closing");
            let _ = ws_tx.send(Message::Close(None)).await;
            return;
        }
    };

    info!(session_id = %request.session_id, ?channels, "client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    if let Ok(json) = serde_json::to_string(&connection_frame(&connection_id)) {
        let _ = ws_tx.send(Message::Text(json.into())).await;
    }

    // outbound forwarder with periodic pings
    let outbound_conn = Arc::clone(&connection);
    let shutdown = app.shutdown_token();
    let ping_every = config.heartbeat_interval();
    let pong_timeout = config.heartbeat_timeout();
    let mut outbound = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(ping_every);
        // skip the immediate first tick
        let _ = ping_interval.tick().await;

        loop {
            tokio::select! {
                msg = send_rx.recv() => {
                    match msg {
                        Some(text) => {
                            if ws_tx.send(Message::Text(text.to_string().into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping_interval.tick() => {
                    if !outbound_conn.check_alive() && outbound_conn.last_pong_elapsed() > pong_timeout {
                        warn!("client unresponsive for {:?}, disconnecting", pong_timeout);
                        break;
                    }
                    if ws_tx.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
                () = shutdown.cancelled() => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    loop {
        let frame = tokio::select! {
            frame = ws_rx.next() => frame,
            _ = &mut outbound => {
                debug!("outbound closed");
                break;
            }
        };
        let Some(Ok(msg)) = frame else { break };

        let frame = match msg {
            Message::Text(text) => text.as_str().as_bytes().to_vec(),
            // not necessarily UTF-8; decoding reports a protocol error
            Message::Binary(data) => data.to_vec(),
            Message::Close(_) => {
                info!("client sent close frame");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => {
                connection.mark_alive();
                continue;
            }
        };
        connection.mark_alive();
        if !handle_frame(&app, &route, &connection, &request, &frame).await {
            break;
        }
    }

    info!(dropped = connection.drop_count(), "client disconnected");
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(connection.age().as_secs_f64());
    outbound.abort();
    drop(guard);
}

/// Dispatch one frame and queue its reply before the next frame is read.
///
/// Returns `false` when the reply could not be queued and the session
/// should end.
async fn handle_frame(
    app: &App,
    route: &Arc<Route>,
    connection: &ClientConnection,
    request: &RequestInfo,
    frame: &[u8],
) -> bool {
    let reply = match Event::decode(frame) {
        Ok(event) => {
            let request = RequestInfo {
                request_id: RequestId::new(),
                ..request.clone()
            };
            dispatch(
                route,
                event,
                request,
                DispatchMode::Patch,
                app.config().handler_timeout(),
            )
            .await
        }
        Err(err) => {
            warn!(error = %err, "invalid event frame");
            error_reply(route, &err, DispatchMode::Patch)
        }
    };

    if let Some(list) = reply.instructions().filter(|list| !list.is_empty()) {
        let payload = match serde_json::to_string(list) {
            Ok(payload) => Arc::new(payload),
            Err(err) => {
                warn!(error = %err, "failed to serialize reply");
                return true;
            }
        };
        let wait = app.config().heartbeat_timeout();
        match tokio::time::timeout(wait, connection.send_reply(payload)).await {
            Ok(true) => {}
            Ok(false) => {
                debug!("connection closed before reply was queued");
                return false;
            }
            Err(_) => {
                warn!("client not reading for {:?}, disconnecting", wait);
                return false;
            }
        }
    }
    app.publish_reply(route, &reply, request);
    true
}

#[cfg(test)]
mod tests {
    // Session loops need real sockets; they are covered by tests/integration.rs.
    use super::*;

    #[test]
    fn connection_frame_shape() {
        let frame = connection_frame(&ConnectionId::from("conn_1"));
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(
            json,
            json!([{"op": "store", "name": "fir_connection", "data": {"id": "conn_1"}}])
        );
    }
}

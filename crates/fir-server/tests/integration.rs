//! End-to-end tests against a real listener and WebSocket clients.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::header::{CONTENT_TYPE, COOKIE, SET_COOKIE};
use axum::http::{Method, Request, StatusCode};
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tower::ServiceExt;

use fir_core::PatchList;
use fir_pubsub::{Broker, InMemoryBroker};
use fir_server::{App, CONNECTION_ID_HEADER, Route, RouteBuilder, RouteContext, ServerConfig};
use fir_template::MemoryLoader;

const TIMEOUT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(200);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

fn loader() -> MemoryLoader {
    MemoryLoader::new()
        .with("count.html", "<p>{{ count }}</p>")
        .with("item.html", "<li>{{ text }}</li>")
        .with("blob.html", "<pre>{{ text }}</pre>")
}

/// Counter route whose connections share a channel per `?room=`.
fn room_route() -> RouteBuilder {
    Route::builder("counter", "/")
        .content("count.html")
        .partials(["item.html", "blob.html"])
        .channel(|route_id, req| req.query_param("room").map(|room| format!("{route_id}:{room}")))
        .on_event("inc", |ctx: RouteContext| async move {
            #[derive(serde::Deserialize)]
            struct Params {
                count: i64,
            }
            let params: Params = ctx.bind()?;
            Ok::<_, fir_core::FirError>(ctx.data(json!({"count": params.count + 1})))
        })
}

async fn boot(config: ServerConfig, routes: Vec<RouteBuilder>) -> (App, InMemoryBroker, SocketAddr) {
    let broker = InMemoryBroker::new(64);
    let app = App::new(config, Arc::new(broker.clone()), Arc::new(loader())).unwrap();
    for route in routes {
        let _ = app.route(route).unwrap();
    }
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = app.clone();
    drop(tokio::spawn(async move { server.serve(listener).await }));
    (app, broker, addr)
}

/// Connect and consume the connection-id frame. Returns the stream and id.
async fn connect(addr: SocketAddr, path: &str) -> (WsStream, String) {
    connect_as(addr, path, None).await
}

/// [`connect`] carrying a session cookie.
async fn connect_as(addr: SocketAddr, path: &str, cookie: Option<&str>) -> (WsStream, String) {
    let mut request = format!("ws://{addr}{path}").into_client_request().unwrap();
    if let Some(cookie) = cookie {
        let _ = request.headers_mut().insert(COOKIE, cookie.parse().unwrap());
    }
    let (mut ws, _) = connect_async(request).await.unwrap();
    let first = next_json(&mut ws).await;
    assert_eq!(first[0]["op"], "store");
    assert_eq!(first[0]["name"], "fir_connection");
    let id = first[0]["data"]["id"].as_str().unwrap().to_owned();
    (ws, id)
}

async fn next_json(ws: &mut WsStream) -> Value {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("ws error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

/// Assert no text frame arrives within [`QUIET`].
async fn assert_quiet(ws: &mut WsStream) {
    let deadline = tokio::time::Instant::now() + QUIET;
    loop {
        match tokio::time::timeout_at(deadline, ws.next()).await {
            Err(_) => return,
            Ok(Some(Ok(Message::Text(text)))) => panic!("unexpected frame: {}", text.as_str()),
            Ok(Some(Ok(_))) => {}
            Ok(other) => panic!("stream ended: {other:?}"),
        }
    }
}

/// Load `path` and return the `name=value` session cookie it sets.
async fn session_cookie(app: &App, path: &str) -> String {
    let req = Request::builder().uri(path).body(Body::empty()).unwrap();
    let resp = app.router().oneshot(req).await.unwrap();
    let set = resp.headers().get(SET_COOKIE).unwrap().to_str().unwrap();
    set.split(';').next().unwrap().to_owned()
}

fn post_event(uri: &str, event: Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(event.to_string()))
        .unwrap()
}

async fn send_event(ws: &mut WsStream, event: Value) {
    ws.send(Message::Text(event.to_string().into())).await.unwrap();
}

#[tokio::test]
async fn event_reply_reaches_peers_but_not_origin() {
    let (_app, _broker, addr) = boot(ServerConfig::default(), vec![room_route()]).await;
    let (mut origin, _) = connect(addr, "/?room=a").await;
    let (mut peer, _) = connect(addr, "/?room=a").await;

    send_event(&mut origin, json!({"id": "inc", "params": {"count": 1}})).await;

    let expected = json!([{"op": "morph", "selector": "body", "html": "<p>2</p>"}]);
    assert_eq!(next_json(&mut origin).await, expected);
    assert_eq!(next_json(&mut peer).await, expected);
    assert_quiet(&mut origin).await;
}

#[tokio::test]
async fn replies_keep_frame_order() {
    let (_app, _broker, addr) = boot(ServerConfig::default(), vec![room_route()]).await;
    let (mut ws, _) = connect(addr, "/?room=order").await;

    for n in 0..10 {
        send_event(&mut ws, json!({"id": "inc", "params": {"count": n}})).await;
    }
    for n in 0..10 {
        let reply = next_json(&mut ws).await;
        assert_eq!(reply[0]["html"], format!("<p>{}</p>", n + 1));
    }
}

#[tokio::test]
async fn channels_are_isolated() {
    let (app, _broker, addr) = boot(ServerConfig::default(), vec![room_route()]).await;
    let (mut in_a, _) = connect(addr, "/?room=a").await;
    let (mut in_b, _) = connect(addr, "/?room=b").await;

    let patches = PatchList::new().append("#list", "item", json!({"text": "hello"}));
    app.publish("counter", "counter:a", &patches).await.unwrap();

    assert_eq!(
        next_json(&mut in_a).await,
        json!([{"op": "append", "selector": "#list", "html": "<li>hello</li>"}])
    );
    assert_quiet(&mut in_b).await;
}

#[tokio::test]
async fn unknown_event_errors_only_the_sender() {
    let (_app, _broker, addr) = boot(ServerConfig::default(), vec![room_route()]).await;
    let (mut origin, _) = connect(addr, "/?room=err").await;
    let (mut peer, _) = connect(addr, "/?room=err").await;

    send_event(&mut origin, json!({"id": "nope"})).await;
    let reply = next_json(&mut origin).await;
    assert_eq!(reply[0]["op"], "morph");
    assert!(reply[0]["html"].as_str().unwrap().contains("NOT_FOUND"));

    send_event(&mut origin, json!("not an event")).await;
    let reply = next_json(&mut origin).await;
    assert!(reply[0]["html"].as_str().unwrap().contains("PROTOCOL"));

    origin
        .send(Message::Binary(vec![0xff, 0xfe, 0xfd].into()))
        .await
        .unwrap();
    let reply = next_json(&mut origin).await;
    assert!(reply[0]["html"].as_str().unwrap().contains("PROTOCOL"));

    assert_quiet(&mut peer).await;
}

#[tokio::test]
async fn http_event_skips_its_own_connection() {
    let (app, _broker, addr) = boot(ServerConfig::default(), vec![room_route()]).await;
    let cookie = session_cookie(&app, "/?room=h").await;
    let (mut own, own_id) = connect_as(addr, "/?room=h", Some(&cookie)).await;
    let (mut peer, _) = connect(addr, "/?room=h").await;

    let mut req = post_event("/?room=h", json!({"id": "inc", "params": {"count": 9}}));
    let _ = req.headers_mut().insert(COOKIE, cookie.parse().unwrap());
    let _ = req.headers_mut().insert(CONNECTION_ID_HEADER, own_id.parse().unwrap());
    let resp = app.router().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    assert_eq!(next_json(&mut peer).await[0]["html"], "<p>10</p>");
    assert_quiet(&mut own).await;
}

#[tokio::test]
async fn connection_id_from_another_session_is_ignored() {
    let (app, _broker, addr) = boot(ServerConfig::default(), vec![room_route()]).await;
    let (mut victim, victim_id) = connect(addr, "/?room=v").await;

    // no cookie: a fresh session that does not own the named connection
    let mut req = post_event("/?room=v", json!({"id": "inc", "params": {"count": 1}}));
    let _ = req.headers_mut().insert(CONNECTION_ID_HEADER, victim_id.parse().unwrap());
    let resp = app.router().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    assert_eq!(next_json(&mut victim).await[0]["html"], "<p>2</p>");
}

#[tokio::test]
async fn own_reply_survives_a_full_send_buffer() {
    let config = ServerConfig {
        send_buffer: 2,
        ..ServerConfig::default()
    };
    let (app, _broker, addr) = boot(config, vec![room_route()]).await;
    let (mut ws, _) = connect(addr, "/?room=z").await;

    // flood the connection while the client is not reading
    let blob = "x".repeat(512 * 1024);
    for _ in 0..40 {
        let patches = PatchList::new().append("#log", "blob", json!({"text": blob}));
        app.publish("counter", "counter:z", &patches).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    send_event(&mut ws, json!({"id": "inc", "params": {"count": 5}})).await;

    let mut reply = None;
    for _ in 0..50 {
        let frame = next_json(&mut ws).await;
        if frame[0]["op"] == "morph" {
            reply = Some(frame);
            break;
        }
    }
    let reply = reply.expect("reply to the client's own event was dropped");
    assert_eq!(reply[0]["html"], "<p>6</p>");
}

#[tokio::test]
async fn closed_connection_is_released() {
    let (app, broker, addr) = boot(ServerConfig::default(), vec![room_route()]).await;
    let (mut ws, _) = connect(addr, "/?room=gone").await;
    assert_eq!(app.connections().connection_count(), 1);
    assert!(broker.has_subscribers("counter:gone").await.unwrap());

    ws.close(None).await.unwrap();
    drop(ws);

    timeout(TIMEOUT, async {
        loop {
            if app.connections().connection_count() == 0
                && !broker.has_subscribers("counter:gone").await.unwrap()
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("connection was not released");
    assert_eq!(app.health().connections, 0);
}

#[tokio::test]
async fn websocket_disabled_route_serves_http_only() {
    let route = Route::builder("plain", "/plain")
        .content("count.html")
        .websocket(false)
        .on_event("inc", |ctx: RouteContext| async move { ctx.data(json!({"count": 1})) });
    let (app, broker, addr) = boot(ServerConfig::default(), vec![route]).await;

    assert!(connect_async(format!("ws://{addr}/plain")).await.is_err());
    assert_eq!(app.connections().connection_count(), 0);

    let resp = app.router().oneshot(post_event("/plain", json!({"id": "inc"}))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(broker.channel_count(), 0);
}

#[tokio::test]
async fn concurrent_unknown_events_are_not_found() {
    let (app, _broker, _addr) = boot(ServerConfig::default(), vec![room_route()]).await;
    let router = app.router();

    let requests = (0..100).map(|n| {
        let router = router.clone();
        async move {
            let req = post_event("/", json!({"id": format!("missing-{n}")}));
            router.oneshot(req).await.unwrap().status()
        }
    });
    let statuses = futures::future::join_all(requests).await;
    assert!(statuses.iter().all(|s| *s == StatusCode::NOT_FOUND));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_distinct_events_get_their_own_results() {
    let (app, _broker, _addr) = boot(ServerConfig::default(), vec![room_route()]).await;
    let router = app.router();

    let requests: Vec<_> = (0..100_i64)
        .map(|n| {
            let router = router.clone();
            tokio::spawn(async move {
                let req = post_event("/", json!({"id": "inc", "params": {"count": n}}));
                let resp = router.oneshot(req).await.unwrap();
                assert_eq!(resp.status(), StatusCode::OK);
                let bytes = axum::body::to_bytes(resp.into_body(), 100_000).await.unwrap();
                let body: Value = serde_json::from_slice(&bytes).unwrap();
                (n, body)
            })
        })
        .collect();

    for request in requests {
        let (n, body) = request.await.unwrap();
        assert_eq!(body[0]["html"], format!("<p>{}</p>", n + 1));
    }
}

#[tokio::test]
async fn shutdown_closes_sessions() {
    let (app, _broker, addr) = boot(ServerConfig::default(), vec![room_route()]).await;
    let (mut ws, _) = connect(addr, "/?room=bye").await;

    app.shutdown();

    let closed = timeout(TIMEOUT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok());
}

#[tokio::test]
async fn unresponsive_client_is_dropped() {
    let config = ServerConfig {
        heartbeat_interval_ms: 50,
        heartbeat_timeout_ms: 100,
        ..ServerConfig::default()
    };
    let (app, _broker, addr) = boot(config, vec![room_route()]).await;
    // a client that never reads never answers pings
    let (_ws, _) = connect(addr, "/?room=idle").await;

    timeout(TIMEOUT, async {
        while app.connections().connection_count() > 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("idle connection was not dropped");
}

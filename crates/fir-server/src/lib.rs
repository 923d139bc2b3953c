//! # fir-server
//!
//! Axum HTTP + `WebSocket` server for fir routes.
//!
//! - [`App`]: route registry, session cookies, router and graceful shutdown
//! - [`HandlerChain`]: priority-ordered classification of each request into
//!   a WebSocket upgrade, a JSON or form event, or a page load
//! - [`dispatch()`]: runs one event through its handler and turns the
//!   outcome into a page, a redirect or DOM instructions
//! - [`websocket`]: per-connection sessions subscribed to broker channels,
//!   so an event on one connection patches every other connection in scope

#![deny(unsafe_code)]

pub mod chain;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod health;
pub mod metrics;
pub mod route;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod websocket;

pub use chain::{CONNECTION_ID_HEADER, HandlerChain, RequestHandler};
pub use config::{ServerConfig, SessionConfig};
pub use context::{RequestInfo, RouteContext};
pub use dispatch::{DispatchMode, Reply, ReplyBody, dispatch};
pub use route::{EventHandler, HandlerFn, ResponseFormat, Route, RouteBuilder};
pub use server::App;
pub use websocket::{CONNECTION_STORE, ConnectionManager};

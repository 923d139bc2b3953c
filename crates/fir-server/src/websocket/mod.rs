//! WebSocket connections: per-client state, the connection registry with its
//! channel subscriptions, and the session loop.

pub mod connection;
pub mod manager;
pub mod session;

pub use connection::ClientConnection;
pub use manager::{ConnectionGuard, ConnectionManager};
pub use session::{CONNECTION_STORE, connection_frame, run_ws_session};

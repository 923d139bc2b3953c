//! WebSocket client connection state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use fir_core::{ConnectionId, SessionId};
use metrics::counter;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::metrics::WS_DROPPED_TOTAL;

/// A connected WebSocket client.
pub struct ClientConnection {
    /// Unique connection ID.
    pub id: ConnectionId,
    /// Session bound when the socket was upgraded.
    pub session_id: SessionId,
    /// Route the socket was opened on.
    pub route_id: String,
    /// Send channel to the client's WebSocket write task.
    tx: mpsc::Sender<Arc<String>>,
    /// When this connection was established.
    pub connected_at: Instant,
    /// Whether the client has responded to the last ping.
    pub is_alive: AtomicBool,
    /// When the last Pong (or any activity) was received.
    last_pong: Mutex<Instant>,
    /// Count of messages dropped due to full channel.
    pub dropped_messages: AtomicU64,
    /// Subscribed channels and their forwarder tasks.
    subscriptions: Mutex<Vec<(String, JoinHandle<()>)>>,
}

impl ClientConnection {
    /// Create a new connection.
    pub fn new(
        id: ConnectionId,
        session_id: SessionId,
        route_id: impl Into<String>,
        tx: mpsc::Sender<Arc<String>>,
    ) -> Self {
        let now = Instant::now();
        Self {
            id,
            session_id,
            route_id: route_id.into(),
            tx,
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    /// Queue a text frame for the client.
    ///
    /// Returns `false` if the channel is full or closed, and increments
    /// the dropped message counter.
    pub fn send(&self, message: Arc<String>) -> bool {
        if self.tx.try_send(message).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            counter!(WS_DROPPED_TOTAL).increment(1);
            false
        }
    }

    /// Queue a reply to the client's own event, waiting for buffer space.
    ///
    /// Only fails once the connection is closed; replies are never dropped
    /// for a full buffer the way broadcasts are.
    pub async fn send_reply(&self, message: Arc<String>) -> bool {
        self.tx.send(message).await.is_ok()
    }

    /// Total messages dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Mark the connection as alive (pong received).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Duration since the last pong (or connection establishment).
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Check and reset the alive flag for heartbeat.
    ///
    /// Returns `true` if the connection was alive since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Record a subscription's forwarder task.
    pub(crate) fn add_subscription(&self, channel: String, forwarder: JoinHandle<()>) {
        self.subscriptions.lock().push((channel, forwarder));
    }

    /// Channels this connection is subscribed to.
    pub fn channels(&self) -> Vec<String> {
        self.subscriptions
            .lock()
            .iter()
            .map(|(channel, _)| channel.clone())
            .collect()
    }

    /// Abort every forwarder; their subscriptions are released as they drop.
    pub(crate) fn release_subscriptions(&self) -> usize {
        let subscriptions = std::mem::take(&mut *self.subscriptions.lock());
        let count = subscriptions.len();
        for (_, forwarder) in subscriptions {
            forwarder.abort();
        }
        count
    }
}

impl Drop for ClientConnection {
    fn drop(&mut self) {
        let _ = self.release_subscriptions();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_connection(buffer: usize) -> (ClientConnection, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(buffer);
        let conn = ClientConnection::new(
            ConnectionId::from("conn_1"),
            SessionId::from("sess_1"),
            "home",
            tx,
        );
        (conn, rx)
    }

    #[test]
    fn create_connection() {
        let (conn, _rx) = make_connection(32);
        assert_eq!(conn.id.as_str(), "conn_1");
        assert_eq!(conn.session_id.as_str(), "sess_1");
        assert_eq!(conn.route_id, "home");
        assert!(conn.is_alive.load(Ordering::Relaxed));
        assert!(conn.channels().is_empty());
    }

    #[tokio::test]
    async fn send_message_success() {
        let (conn, mut rx) = make_connection(32);
        assert!(conn.send(Arc::new("hello".into())));
        let msg = rx.recv().await.unwrap();
        assert_eq!(&*msg, "hello");
    }

    #[tokio::test]
    async fn send_to_closed_channel_returns_false() {
        let (conn, rx) = make_connection(32);
        drop(rx);
        assert!(!conn.send(Arc::new("hello".into())));
        assert_eq!(conn.drop_count(), 1);
    }

    #[tokio::test]
    async fn send_to_full_channel_counts_drop() {
        let (conn, _rx) = make_connection(1);
        assert!(conn.send(Arc::new("msg1".into())));
        // channel is now full
        assert!(!conn.send(Arc::new("msg2".into())));
        assert_eq!(conn.drop_count(), 1);
    }

    #[tokio::test]
    async fn reply_waits_for_a_full_buffer() {
        let (conn, mut rx) = make_connection(1);
        assert!(conn.send(Arc::new("broadcast".into())));
        assert!(!conn.send(Arc::new("dropped".into())));

        let reader = tokio::spawn(async move {
            let first = rx.recv().await.unwrap();
            let second = rx.recv().await.unwrap();
            (first, second)
        });
        assert!(conn.send_reply(Arc::new("reply".into())).await);
        let (first, second) = reader.await.unwrap();
        assert_eq!(&*first, "broadcast");
        assert_eq!(&*second, "reply");
        assert_eq!(conn.drop_count(), 1);
    }

    #[tokio::test]
    async fn reply_to_closed_connection_fails() {
        let (conn, rx) = make_connection(1);
        drop(rx);
        assert!(!conn.send_reply(Arc::new("reply".into())).await);
    }

    #[test]
    fn heartbeat_flags() {
        let (conn, _rx) = make_connection(4);
        assert!(conn.check_alive());
        assert!(!conn.check_alive());
        conn.mark_alive();
        assert!(conn.check_alive());
        assert!(conn.last_pong_elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn release_aborts_forwarders() {
        let (conn, _rx) = make_connection(4);
        let task = tokio::spawn(std::future::pending::<()>());
        let abort = task.abort_handle();
        conn.add_subscription("room:1".into(), task);
        assert_eq!(conn.channels(), vec!["room:1"]);

        assert_eq!(conn.release_subscriptions(), 1);
        assert!(conn.channels().is_empty());
        for _ in 0..10 {
            if abort.is_finished() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(abort.is_finished());
    }
}

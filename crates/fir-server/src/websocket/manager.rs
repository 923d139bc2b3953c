//! Connection registry and channel subscriptions.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Weak};

use fir_core::{ConnectionId, Result, SessionId};
use fir_pubsub::{Broker, Subscription};
use parking_lot::RwLock;
use tracing::{debug, warn};

use super::connection::ClientConnection;

/// Owns every live connection and its broker subscriptions.
///
/// Each subscription is drained by a forwarder task that queues payloads on
/// the connection, skipping payloads the connection itself produced.
pub struct ConnectionManager {
    connections: RwLock<HashMap<ConnectionId, Arc<ClientConnection>>>,
    broker: Arc<dyn Broker>,
}

impl ConnectionManager {
    /// Manager subscribing through `broker`.
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            broker,
        }
    }

    /// The broker connections subscribe through.
    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    /// Add `connection` and subscribe it to `channels`.
    ///
    /// The returned guard removes the connection and releases every
    /// subscription when dropped, including when a later subscribe fails.
    pub async fn register(
        self: &Arc<Self>,
        connection: Arc<ClientConnection>,
        channels: &[String],
    ) -> Result<ConnectionGuard> {
        let id = connection.id.clone();
        let _ = self
            .connections
            .write()
            .insert(id.clone(), Arc::clone(&connection));
        let guard = ConnectionGuard {
            manager: Arc::clone(self),
            id,
        };

        for channel in channels {
            let subscription = self.broker.subscribe(channel).await?;
            let forwarder = tokio::spawn(forward(subscription, Arc::downgrade(&connection)));
            connection.add_subscription(channel.clone(), forwarder);
        }
        debug!(
            connection_id = %connection.id,
            channels = channels.len(),
            broker = self.broker.name(),
            "connection subscribed"
        );
        Ok(guard)
    }

    /// Remove a connection and release its subscriptions.
    pub fn remove(&self, id: &ConnectionId) -> bool {
        let removed = self.connections.write().remove(id);
        match removed {
            Some(connection) => {
                let released = connection.release_subscriptions();
                debug!(connection_id = %id, released, "connection removed");
                true
            }
            None => false,
        }
    }

    /// Look up a connection.
    pub fn get(&self, id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        self.connections.read().get(id).cloned()
    }

    /// Whether `id` is a live connection bound to `session`.
    pub fn is_owned_by(&self, id: &ConnectionId, session: &SessionId) -> bool {
        self.get(id).is_some_and(|c| c.session_id == *session)
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    /// Number of distinct channels live connections are subscribed to.
    pub fn channel_count(&self) -> usize {
        self.connections
            .read()
            .values()
            .flat_map(|c| c.channels())
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// Number of live connections subscribed to `channel`.
    pub fn connections_on(&self, channel: &str) -> usize {
        self.connections
            .read()
            .values()
            .filter(|c| c.channels().iter().any(|ch| ch == channel))
            .count()
    }
}

async fn forward(mut subscription: Subscription, connection: Weak<ClientConnection>) {
    while let Some(message) = subscription.recv().await {
        let Some(connection) = connection.upgrade() else {
            break;
        };
        if message.is_from(connection.id.as_str()) {
            continue;
        }
        if !connection.send(Arc::new(message.payload)) {
            warn!(
                connection_id = %connection.id,
                channel = subscription.channel(),
                "client buffer full, dropped broadcast"
            );
        }
    }
}

/// Removes its connection from the manager when dropped.
pub struct ConnectionGuard {
    manager: Arc<ConnectionManager>,
    id: ConnectionId,
}

impl ConnectionGuard {
    /// The guarded connection.
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let _ = self.manager.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fir_core::SessionId;
    use fir_pubsub::{InMemoryBroker, Message};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn manager() -> (Arc<ConnectionManager>, InMemoryBroker) {
        let broker = InMemoryBroker::default();
        (
            Arc::new(ConnectionManager::new(Arc::new(broker.clone()))),
            broker,
        )
    }

    fn connection(id: &str) -> (Arc<ClientConnection>, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(16);
        let conn = ClientConnection::new(ConnectionId::from(id), SessionId::new(), "home", tx);
        (Arc::new(conn), rx)
    }

    async fn eventually(check: impl Fn() -> bool) -> bool {
        for _ in 0..100 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        check()
    }

    async fn recv(rx: &mut mpsc::Receiver<Arc<String>>) -> Option<String> {
        tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .ok()
            .flatten()
            .map(|s| (*s).clone())
    }

    #[tokio::test]
    async fn register_subscribes_every_channel() {
        let (manager, broker) = manager();
        let (conn, _rx) = connection("c1");
        let _guard = manager
            .register(conn, &["room:1".into(), "global".into()])
            .await
            .unwrap();

        assert_eq!(manager.connection_count(), 1);
        assert_eq!(manager.channel_count(), 2);
        assert_eq!(manager.connections_on("global"), 1);
        assert_eq!(broker.subscriber_count("room:1"), 1);
        assert_eq!(broker.subscriber_count("global"), 1);
    }

    #[tokio::test]
    async fn forwards_payloads_and_skips_own_origin() {
        let (manager, broker) = manager();
        let (conn, mut rx) = connection("c1");
        let _guard = manager.register(conn, &["room:1".into()]).await.unwrap();

        broker
            .publish("room:1", Message::from_origin("c1", "mine"))
            .await
            .unwrap();
        broker
            .publish("room:1", Message::from_origin("c2", "theirs"))
            .await
            .unwrap();

        assert_eq!(recv(&mut rx).await.as_deref(), Some("theirs"));
        assert!(recv(&mut rx).await.is_none());
    }

    #[tokio::test]
    async fn ownership_requires_matching_session() {
        let (manager, _broker) = manager();
        let (conn, _rx) = connection("c1");
        let session = conn.session_id.clone();
        let _guard = manager.register(conn, &[]).await.unwrap();

        assert!(manager.is_owned_by(&ConnectionId::from("c1"), &session));
        assert!(!manager.is_owned_by(&ConnectionId::from("c1"), &SessionId::new()));
        assert!(!manager.is_owned_by(&ConnectionId::from("ghost"), &session));
    }

    #[tokio::test]
    async fn channels_are_isolated() {
        let (manager, broker) = manager();
        let (a, mut rx_a) = connection("a");
        let (b, mut rx_b) = connection("b");
        let _ga = manager.register(a, &["room:1".into()]).await.unwrap();
        let _gb = manager.register(b, &["room:2".into()]).await.unwrap();

        broker.publish("room:1", Message::new("hello")).await.unwrap();

        assert_eq!(recv(&mut rx_a).await.as_deref(), Some("hello"));
        assert!(recv(&mut rx_b).await.is_none());
    }

    #[tokio::test]
    async fn dropping_guard_releases_everything() {
        let (manager, broker) = manager();
        let (conn, _rx) = connection("c1");
        let guard = manager
            .register(conn, &["room:1".into(), "global".into()])
            .await
            .unwrap();
        drop(guard);

        assert_eq!(manager.connection_count(), 0);
        assert_eq!(manager.channel_count(), 0);
        assert!(eventually(|| broker.channel_count() == 0).await);
        // publishing to a released channel reaches nobody and does not fail
        broker.publish("room:1", Message::new("x")).await.unwrap();
    }

    #[tokio::test]
    async fn remove_unknown_is_noop() {
        let (manager, _broker) = manager();
        assert!(!manager.remove(&ConnectionId::from("ghost")));
        assert!(manager.get(&ConnectionId::from("ghost")).is_none());
    }
}

//! In-process broker.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::broker::{Broker, Message, Subscription};
use crate::errors::Result;

/// Default per-subscriber buffer.
pub const DEFAULT_BUFFER: usize = 64;

type Subscribers = HashMap<u64, mpsc::Sender<Message>>;

struct Inner {
    channels: Mutex<HashMap<String, Subscribers>>,
    next_id: AtomicU64,
    buffer: usize,
    dropped: AtomicU64,
}

impl Inner {
    fn remove(&self, channel: &str, id: u64) {
        let mut channels = self.channels.lock();
        if let Some(subs) = channels.get_mut(channel) {
            let _ = subs.remove(&id);
            if subs.is_empty() {
                let _ = channels.remove(channel);
            }
        }
    }
}

/// Fans messages out to subscribers in this process.
///
/// Each subscriber owns a bounded queue; publishing never waits on a slow
/// subscriber, it drops the message for that subscriber instead.
#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<Inner>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER)
    }
}

impl InMemoryBroker {
    /// Broker with `buffer` queued messages per subscriber.
    pub fn new(buffer: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                channels: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                buffer: buffer.max(1),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Number of channels with at least one subscriber.
    pub fn channel_count(&self) -> usize {
        self.inner.channels.lock().len()
    }

    /// Number of subscribers on `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.inner
            .channels
            .lock()
            .get(channel)
            .map_or(0, HashMap::len)
    }

    /// Messages dropped because a subscriber's buffer was full.
    pub fn dropped_messages(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn publish(&self, channel: &str, message: Message) -> Result<()> {
        let mut closed = Vec::new();
        let mut delivered = 0usize;
        {
            let channels = self.inner.channels.lock();
            let Some(subs) = channels.get(channel) else {
                debug!(channel, "publish with no subscribers");
                return Ok(());
            };
            for (id, tx) in subs {
                match tx.try_send(message.clone()) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        let _ = self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                        metrics::counter!("fir_pubsub_dropped_total", "broker" => "memory")
                            .increment(1);
                        warn!(channel, subscriber = id, "subscriber buffer full, dropping message");
                    }
                    Err(TrySendError::Closed(_)) => closed.push(*id),
                }
            }
        }
        for id in closed {
            self.inner.remove(channel, id);
        }
        debug!(channel, delivered, "published");
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.inner.buffer);
        let _ = self
            .inner
            .channels
            .lock()
            .entry(channel.to_owned())
            .or_default()
            .insert(id, tx);

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let owned = channel.to_owned();
        Ok(Subscription::new(channel, rx, move || {
            if let Some(inner) = weak.upgrade() {
                inner.remove(&owned, id);
            }
        }))
    }

    async fn has_subscribers(&self, channel: &str) -> Result<bool> {
        Ok(self.subscriber_count(channel) > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn contract() {
        crate::contract::run_all(&InMemoryBroker::default()).await;
    }

    #[tokio::test]
    async fn empty_channels_are_removed() {
        let broker = InMemoryBroker::default();
        let a = broker.subscribe("room").await.unwrap();
        let b = broker.subscribe("room").await.unwrap();
        assert_eq!(broker.subscriber_count("room"), 2);
        drop(a);
        assert_eq!(broker.channel_count(), 1);
        b.unsubscribe();
        assert_eq!(broker.channel_count(), 0);
    }

    #[tokio::test]
    async fn full_buffer_drops() {
        let broker = InMemoryBroker::new(1);
        let mut sub = broker.subscribe("room").await.unwrap();
        broker.publish("room", Message::new("1")).await.unwrap();
        broker.publish("room", Message::new("2")).await.unwrap();
        assert_eq!(broker.dropped_messages(), 1);
        assert_eq!(sub.try_recv().unwrap().payload, "1");
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn subscription_outliving_broker() {
        let broker = InMemoryBroker::default();
        let mut sub = broker.subscribe("room").await.unwrap();
        drop(broker);
        assert!(sub.recv().await.is_none());
    }
}

//! The broker contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::errors::Result;

/// One published payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Connection or request that produced the payload, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    /// Serialized instruction array.
    pub payload: String,
}

impl Message {
    /// Message with no origin; every subscriber receives it.
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            origin: None,
            payload: payload.into(),
        }
    }

    /// Message produced by `origin`.
    pub fn from_origin(origin: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            origin: Some(origin.into()),
            payload: payload.into(),
        }
    }

    /// Whether `id` produced this message.
    pub fn is_from(&self, id: &str) -> bool {
        self.origin.as_deref() == Some(id)
    }
}

/// Channel-scoped publish/subscribe.
///
/// Delivery is at-most-once: a subscriber whose buffer is full misses the
/// message, and nothing is replayed.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Short implementation name for logs.
    fn name(&self) -> &'static str;

    /// Deliver `message` to every current subscriber of `channel`.
    async fn publish(&self, channel: &str, message: Message) -> Result<()>;

    /// Start receiving messages published to `channel`.
    async fn subscribe(&self, channel: &str) -> Result<Subscription>;

    /// Whether `channel` has at least one subscriber.
    async fn has_subscribers(&self, channel: &str) -> Result<bool>;
}

type Release = Box<dyn FnOnce() + Send>;

/// A live subscription to one channel.
///
/// Dropping it unsubscribes, so a subscription owned by a task is released
/// on every exit path of that task.
pub struct Subscription {
    channel: String,
    rx: mpsc::Receiver<Message>,
    release: Option<Release>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

impl Subscription {
    /// Wrap a receiver; `release` runs once on unsubscribe or drop.
    pub fn new(
        channel: impl Into<String>,
        rx: mpsc::Receiver<Message>,
        release: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            channel: channel.into(),
            rx,
            release: Some(Box::new(release)),
        }
    }

    /// Subscribed channel.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Next message; `None` once the broker side is gone.
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    /// Next message if one is buffered.
    pub fn try_recv(&mut self) -> Option<Message> {
        self.rx.try_recv().ok()
    }

    /// Stop receiving.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
        self.rx.close();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

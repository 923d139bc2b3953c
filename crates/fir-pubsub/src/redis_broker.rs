//! Redis-backed broker.
//!
//! Publishes with `PUBLISH` on a multiplexed connection. Each subscription
//! opens its own pub/sub connection and a forwarding task that decodes
//! messages into the subscription's queue; unsubscribing aborts the task,
//! which closes the connection and with it the server-side subscription.

use async_trait::async_trait;
use futures::StreamExt;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::broker::{Broker, Message, Subscription};
use crate::errors::Result;

/// Prefix applied to every channel key.
pub const CHANNEL_PREFIX: &str = "fir:";

/// Broker over Redis PUBLISH/SUBSCRIBE.
#[derive(Clone)]
pub struct RedisBroker {
    client: redis::Client,
    publisher: MultiplexedConnection,
    buffer: usize,
}

impl std::fmt::Debug for RedisBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBroker")
            .field("buffer", &self.buffer)
            .finish_non_exhaustive()
    }
}

impl RedisBroker {
    /// Connect to `url` with `buffer` queued messages per subscriber.
    pub async fn connect(url: &str, buffer: usize) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let publisher = client.get_multiplexed_async_connection().await?;
        debug!("connected to redis broker");
        Ok(Self {
            client,
            publisher,
            buffer: buffer.max(1),
        })
    }

    fn key(channel: &str) -> String {
        format!("{CHANNEL_PREFIX}{channel}")
    }
}

#[async_trait]
impl Broker for RedisBroker {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn publish(&self, channel: &str, message: Message) -> Result<()> {
        let payload = serde_json::to_string(&message)?;
        let mut conn = self.publisher.clone();
        let receivers: i64 = conn.publish(Self::key(channel), payload).await?;
        debug!(channel, receivers, "published");
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(Self::key(channel)).await?;

        let (tx, rx) = mpsc::channel(self.buffer);
        let owned = channel.to_owned();
        let task = tokio::spawn(async move {
            let mut stream = pubsub.into_on_message();
            while let Some(msg) = stream.next().await {
                let message = match msg
                    .get_payload::<String>()
                    .map_err(crate::errors::PubSubError::from)
                    .and_then(|raw| serde_json::from_str::<Message>(&raw).map_err(Into::into))
                {
                    Ok(message) => message,
                    Err(e) => {
                        warn!(channel = %owned, error = %e, "skipping undecodable message");
                        continue;
                    }
                };
                match tx.try_send(message) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        metrics::counter!("fir_pubsub_dropped_total", "broker" => "redis")
                            .increment(1);
                        warn!(channel = %owned, "subscriber buffer full, dropping message");
                    }
                    Err(TrySendError::Closed(_)) => break,
                }
            }
            debug!(channel = %owned, "redis subscription ended");
        });

        Ok(Subscription::new(channel, rx, move || task.abort()))
    }

    async fn has_subscribers(&self, channel: &str) -> Result<bool> {
        let mut conn = self.publisher.clone();
        let counts: Vec<(String, i64)> = redis::cmd("PUBSUB")
            .arg("NUMSUB")
            .arg(Self::key(channel))
            .query_async(&mut conn)
            .await?;
        Ok(counts.first().is_some_and(|(_, n)| *n > 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_keys_are_prefixed() {
        assert_eq!(RedisBroker::key("home:abc"), "fir:home:abc");
    }

    #[tokio::test]
    async fn connect_rejects_bad_url() {
        assert!(RedisBroker::connect("not a url", 8).await.is_err());
    }

    #[tokio::test]
    #[ignore = "needs a Redis server at FIR_REDIS_URL"]
    async fn contract() {
        let url = std::env::var("FIR_REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".into());
        let broker = RedisBroker::connect(&url, 64).await.unwrap();
        crate::contract::run_all(&broker).await;
    }
}

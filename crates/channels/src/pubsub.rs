//! The cluster pub/sub bus.
//!
//! Every process of a deployment shares one Redis channel; messages carry
//! their target channel in the payload and fan out locally to subscribed
//! connections. Delivery is best-effort, at-most-once per subscriber.

use {
    async_trait::async_trait,
    futures::{Stream, StreamExt},
    serde::{Deserialize, Serialize},
    tokio::sync::broadcast,
};

use axon_common::{Context, ErrorKind, Result};

/// The wire shape carried on the deployment's Redis channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PubSubMessage {
    pub channel: String,
    pub message: serde_json::Value,
    pub sender: String,
}

pub type MessageStream = std::pin::Pin<Box<dyn Stream<Item = PubSubMessage> + Send>>;

#[async_trait]
pub trait PubSubBus: Send + Sync {
    async fn publish(&self, message: &PubSubMessage) -> Result<()>;

    /// Open this process's incoming stream. Called once, by the fan-out
    /// loop.
    async fn subscribe(&self) -> Result<MessageStream>;
}

// ── Redis ────────────────────────────────────────────────────────────────────

pub struct RedisBus {
    redis: axon_redis::RedisHandle,
    /// One channel per deployment, named for the application.
    bus_channel: String,
}

impl RedisBus {
    pub fn new(redis: axon_redis::RedisHandle, bus_channel: impl Into<String>) -> Self {
        Self {
            redis,
            bus_channel: bus_channel.into(),
        }
    }
}

#[async_trait]
impl PubSubBus for RedisBus {
    async fn publish(&self, message: &PubSubMessage) -> Result<()> {
        let payload = serde_json::to_string(message)
            .context(ErrorKind::ConnectionServerError, "encode pubsub message")?;
        let mut conn = self.redis.commands();
        let _: () = redis::cmd("PUBLISH")
            .arg(&self.bus_channel)
            .arg(payload)
            .query_async(&mut conn)
            .await
            .context(ErrorKind::ConnectionServerError, "publish")?;
        Ok(())
    }

    async fn subscribe(&self) -> Result<MessageStream> {
        let mut pubsub = self.redis.subscriber().await?;
        pubsub
            .subscribe(&self.bus_channel)
            .await
            .context(ErrorKind::ServerInitialization, "subscribe bus channel")?;
        let stream = pubsub
            .into_on_message()
            .filter_map(|msg| async move {
                let payload: String = msg.get_payload().ok()?;
                serde_json::from_str::<PubSubMessage>(&payload).ok()
            })
            .boxed();
        Ok(stream)
    }
}

// ── In-process ───────────────────────────────────────────────────────────────

/// Single-process bus over a tokio broadcast channel; the test and CLI
/// stand-in for Redis pub/sub.
pub struct LocalBus {
    tx: broadcast::Sender<PubSubMessage>,
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }
}

#[async_trait]
impl PubSubBus for LocalBus {
    async fn publish(&self, message: &PubSubMessage) -> Result<()> {
        // No subscribers yet is fine; delivery is best-effort.
        let _ = self.tx.send(message.clone());
        Ok(())
    }

    async fn subscribe(&self) -> Result<MessageStream> {
        let rx = self.tx.subscribe();
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(msg) => return Some((msg, rx)),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .boxed();
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[tokio::test]
    async fn local_bus_roundtrips() {
        let bus = LocalBus::new();
        let mut stream = bus.subscribe().await.unwrap();
        bus.publish(&PubSubMessage {
            channel: "room:1".into(),
            message: serde_json::json!({ "hello": true }),
            sender: "c1".into(),
        })
        .await
        .unwrap();

        let received = stream.next().await.unwrap();
        assert_eq!(received.channel, "room:1");
        assert_eq!(received.message["hello"], true);
        assert_eq!(received.sender, "c1");
    }
}

//! Broker abstraction behind the Pub/Sub bridge.
//!
//! Backed by Redis in production and an in-memory loopback otherwise.
//! Implementations share ONE publish connection and ONE subscribe
//! connection across every channel; incoming traffic for all subscribed
//! channels arrives on the single receiver handed out at construction.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::BridgeError;

/// A raw message delivered by the broker's subscribe connection.
#[derive(Debug, Clone)]
pub struct BrokerMessage {
    pub channel: String,
    pub payload: String,
}

/// One shared publish/subscribe connection pair to the broker.
///
/// `publish` and `subscribe` only hand work to the broker; delivery is
/// observed later on the incoming stream. Subscribing to a channel twice
/// is harmless at this level — the bridge tracks logical subscribers.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BridgeError>;
    async fn subscribe(&self, channel: &str) -> Result<(), BridgeError>;
    async fn unsubscribe(&self, channel: &str) -> Result<(), BridgeError>;
}

// ---------------------------------------------------------------------------
// In-memory implementation (no-broker deployments and tests)
// ---------------------------------------------------------------------------

/// In-process loopback broker.
///
/// Publishes to a subscribed channel come straight back on the incoming
/// stream, same as a Redis round-trip observed from a single process —
/// publishers hear their own messages.
pub struct MemoryBroker {
    subscribed: Mutex<HashSet<String>>,
    incoming: mpsc::UnboundedSender<BrokerMessage>,
}

impl MemoryBroker {
    /// Build the broker and the incoming stream consumed by the bridge.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<BrokerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let broker = Arc::new(Self {
            subscribed: Mutex::new(HashSet::new()),
            incoming: tx,
        });
        (broker, rx)
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BridgeError> {
        if self.subscribed.lock().contains(channel) {
            let _ = self.incoming.send(BrokerMessage {
                channel: channel.to_string(),
                payload: payload.to_string(),
            });
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<(), BridgeError> {
        self.subscribed.lock().insert(channel.to_string());
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), BridgeError> {
        self.subscribed.lock().remove(channel);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Redis implementation
// ---------------------------------------------------------------------------

/// Redis-backed broker: one `ConnectionManager` for publishing and one
/// split pub/sub connection for subscribing, shared process-wide.
pub struct RedisBroker {
    publish: redis::aio::ConnectionManager,
    sink: tokio::sync::Mutex<redis::aio::PubSubSink>,
}

impl RedisBroker {
    /// Connect both halves and spawn the task forwarding subscribed
    /// traffic onto the incoming stream.
    pub async fn connect(
        url: &str,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<BrokerMessage>), BridgeError> {
        let client = redis::Client::open(url)?;
        let publish = client.get_connection_manager().await?;
        let (sink, mut stream) = client.get_async_pubsub().await?.split();

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                let channel = msg.get_channel_name().to_string();
                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(e) => {
                        tracing::warn!(error = %e, %channel, "undecodable broker payload");
                        continue;
                    }
                };
                if tx.send(BrokerMessage { channel, payload }).is_err() {
                    break;
                }
            }
            tracing::warn!("broker subscribe stream ended");
        });

        let broker = Arc::new(Self {
            publish,
            sink: tokio::sync::Mutex::new(sink),
        });
        Ok((broker, rx))
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BridgeError> {
        use redis::AsyncCommands;

        // ConnectionManager is a cheap handle onto the shared connection.
        let mut conn = self.publish.clone();
        conn.publish::<_, _, ()>(channel, payload).await?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<(), BridgeError> {
        self.sink.lock().await.subscribe(channel).await?;
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), BridgeError> {
        self.sink.lock().await.unsubscribe(channel).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_broker_loops_back_subscribed_channels() {
        let (broker, mut incoming) = MemoryBroker::new();

        broker.subscribe("group:g1").await.unwrap();
        broker.publish("group:g1", "payload").await.unwrap();

        let msg = incoming.recv().await.unwrap();
        assert_eq!(msg.channel, "group:g1");
        assert_eq!(msg.payload, "payload");
    }

    #[tokio::test]
    async fn memory_broker_drops_unsubscribed_channels() {
        let (broker, mut incoming) = MemoryBroker::new();

        broker.publish("group:nobody", "payload").await.unwrap();
        assert!(incoming.try_recv().is_err());

        broker.subscribe("group:g1").await.unwrap();
        broker.unsubscribe("group:g1").await.unwrap();
        broker.publish("group:g1", "payload").await.unwrap();
        assert!(incoming.try_recv().is_err());
    }
}

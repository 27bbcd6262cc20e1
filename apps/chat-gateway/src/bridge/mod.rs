//! Pub/Sub bridge: multiplexes logical group subscriptions onto the shared
//! broker connection pair.
//!
//! One delivery-loop task consumes the broker's incoming stream and invokes
//! the callbacks registered for the matching channel. Callback execution is
//! serialized on that loop across ALL channels, so callbacks must dispatch
//! (enqueue) and return — a blocking callback stalls every group.

pub mod broker;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;

use chat_common::GroupPayload;

use crate::error::BridgeError;
use broker::{Broker, BrokerMessage};

/// Channel naming convention on the broker. External subscribers key on
/// this exact prefix.
const GROUP_CHANNEL_PREFIX: &str = "group:";

/// Broker channel name for a group.
pub fn group_channel(group_id: &str) -> String {
    format!("{GROUP_CHANNEL_PREFIX}{group_id}")
}

/// Callback invoked on the delivery loop for every message on a
/// subscribed group. Must be non-blocking.
pub type GroupCallback = Arc<dyn Fn(GroupPayload) + Send + Sync>;

/// Diagnostic observer for the wildcard view of all group traffic.
///
/// Runs under `catch_unwind`; a panicking observer is logged and the loop
/// keeps delivering. Never a delivery path to sockets.
pub type TrafficObserver = Box<dyn Fn(&str, &GroupPayload) + Send + Sync>;

/// One logical group subscription.
///
/// The owning connection's registry entry keeps the handle; teardown
/// releases every handle through [`PubSubBridge::unsubscribe`] in a single
/// sweep so no callback outlives its socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    id: u64,
    channel: String,
}

struct Subscriber {
    id: u64,
    callback: GroupCallback,
}

/// The bridge object itself. Constructed once and passed by reference into
/// the gateway; all gateway instances in the process share it (and with it
/// the single broker connection pair).
pub struct PubSubBridge {
    broker: Arc<dyn Broker>,
    subscribers: Arc<DashMap<String, Vec<Subscriber>>>,
    next_id: AtomicU64,
}

impl PubSubBridge {
    /// Build the bridge and spawn its delivery loop over `incoming`.
    pub fn new(
        broker: Arc<dyn Broker>,
        incoming: mpsc::UnboundedReceiver<BrokerMessage>,
        observer: Option<TrafficObserver>,
    ) -> Arc<Self> {
        let bridge = Arc::new(Self {
            broker,
            subscribers: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
        });
        tokio::spawn(deliver(Arc::clone(&bridge.subscribers), incoming, observer));
        bridge
    }

    /// Serialize `payload` and publish it under the group's channel.
    ///
    /// Resolving means the broker accepted the message, not that anyone
    /// received it yet.
    pub async fn publish(&self, group_id: &str, payload: &GroupPayload) -> Result<(), BridgeError> {
        let body = serde_json::to_string(payload)?;
        self.broker.publish(&group_channel(group_id), &body).await
    }

    /// Register `callback` for every message on the group.
    ///
    /// The broker-level SUBSCRIBE happens only for the first logical
    /// subscriber of a channel; later calls share it.
    pub async fn subscribe(
        &self,
        group_id: &str,
        callback: GroupCallback,
    ) -> Result<SubscriptionHandle, BridgeError> {
        let channel = group_channel(group_id);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        // Drop the map guard before awaiting on the broker.
        let first_for_channel = {
            let mut entry = self.subscribers.entry(channel.clone()).or_default();
            let first = entry.is_empty();
            entry.push(Subscriber { id, callback });
            first
        };

        if first_for_channel {
            if let Err(e) = self.broker.subscribe(&channel).await {
                self.drop_subscriber(&channel, id);
                return Err(e);
            }
        }

        Ok(SubscriptionHandle { id, channel })
    }

    /// Release one logical subscription. The broker-level UNSUBSCRIBE
    /// happens when the channel's last subscriber is gone.
    pub async fn unsubscribe(&self, handle: &SubscriptionHandle) {
        if self.drop_subscriber(&handle.channel, handle.id) {
            if let Err(e) = self.broker.unsubscribe(&handle.channel).await {
                tracing::warn!(error = %e, channel = %handle.channel, "broker unsubscribe failed");
            }
        }
    }

    /// Remove a subscriber; returns true if the channel is now empty.
    fn drop_subscriber(&self, channel: &str, id: u64) -> bool {
        let Some(mut entry) = self.subscribers.get_mut(channel) else {
            return false;
        };
        entry.retain(|s| s.id != id);
        let empty = entry.is_empty();
        drop(entry);
        if empty {
            self.subscribers.remove_if(channel, |_, subs| subs.is_empty());
        }
        empty
    }
}

/// Delivery loop: parse each incoming broker message and fan it out to the
/// channel's registered callbacks.
async fn deliver(
    subscribers: Arc<DashMap<String, Vec<Subscriber>>>,
    mut incoming: mpsc::UnboundedReceiver<BrokerMessage>,
    observer: Option<TrafficObserver>,
) {
    while let Some(msg) = incoming.recv().await {
        let payload: GroupPayload = match serde_json::from_str(&msg.payload) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, channel = %msg.channel, "undecodable group payload");
                continue;
            }
        };

        if let Some(observe) = &observer {
            let group_id = msg
                .channel
                .strip_prefix(GROUP_CHANNEL_PREFIX)
                .unwrap_or(&msg.channel);
            if catch_unwind(AssertUnwindSafe(|| observe(group_id, &payload))).is_err() {
                tracing::error!(channel = %msg.channel, "traffic observer panicked");
            }
        }

        if let Some(entry) = subscribers.get(&msg.channel) {
            for sub in entry.iter() {
                (sub.callback.as_ref())(payload.clone());
            }
        }
    }
    tracing::debug!("bridge delivery loop ended");
}

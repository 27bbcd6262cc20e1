//! Registry of live connections and their group subscriptions.

use std::collections::HashSet;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::bridge::SubscriptionHandle;

/// Per-connection bookkeeping.
///
/// `groups` answers the join-idempotence question; `handles` is what the
/// close sweep releases through the bridge.
struct ConnectionEntry {
    groups: HashSet<String>,
    handles: Vec<SubscriptionHandle>,
}

/// Shared registry of all live connections.
///
/// Uses `DashMap` for shard-level concurrency and `parking_lot::Mutex` per
/// entry for non-poisoning, fast locking.
pub struct ConnectionRegistry {
    connections: DashMap<String, Mutex<ConnectionEntry>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    /// Register a connection on accept.
    pub fn register(&self, conn_id: String) {
        let entry = ConnectionEntry {
            groups: HashSet::new(),
            handles: Vec::new(),
        };
        self.connections.insert(conn_id, Mutex::new(entry));
    }

    /// Record a group join. Returns false if this connection already joined
    /// the group (or is gone) — the caller must not create a second
    /// subscription.
    pub fn join_group(&self, conn_id: &str, group_id: &str) -> bool {
        match self.connections.get(conn_id) {
            Some(entry) => entry.lock().groups.insert(group_id.to_string()),
            None => false,
        }
    }

    /// Roll back a join marker after a failed bridge subscribe, so a retry
    /// can subscribe again.
    pub fn leave_group(&self, conn_id: &str, group_id: &str) {
        if let Some(entry) = self.connections.get(conn_id) {
            entry.lock().groups.remove(group_id);
        }
    }

    /// Attach a bridge handle to the connection for the close sweep.
    pub fn add_subscription(&self, conn_id: &str, handle: SubscriptionHandle) {
        if let Some(entry) = self.connections.get(conn_id) {
            entry.lock().handles.push(handle);
        }
    }

    /// Remove the connection, returning every subscription handle it held
    /// so the caller can release them. Idempotent: a second call (or a call
    /// for an unknown connection) returns nothing.
    pub fn remove(&self, conn_id: &str) -> Vec<SubscriptionHandle> {
        match self.connections.remove(conn_id) {
            Some((_, entry)) => entry.into_inner().handles,
            None => Vec::new(),
        }
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

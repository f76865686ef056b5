//! Node Registry — the live set of connected nodes
//!
//! Reads (`lookup`, `snapshot_all`) share the lock; `register` and
//! `unregister_by_channel` are exclusive. The lock only guards the map:
//! writes to a node go through its [`NodeChannel`] queue, outside any
//! critical section here.

use super::channel::NodeChannel;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;

/// Descriptive data a node presented at handshake time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NodeInfo {
    pub device_name: String,
    pub platform: String,
    pub client_version: String,
    pub capabilities: Vec<String>,
    /// Unix timestamp (ms) of registration
    pub registered_at: u64,
    /// False when admitted despite a bad token (lenient auth)
    pub authenticated: bool,
}

/// One registry entry
#[derive(Debug, Clone)]
pub struct NodeEntry {
    /// Exclusive send handle of the owning connection
    pub channel: NodeChannel,
    pub info: NodeInfo,
}

/// Serializable view of an entry for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct NodeSummary {
    pub node_id: String,
    pub connection_id: u64,
    #[serde(flatten)]
    pub info: NodeInfo,
}

/// The registry
#[derive(Debug, Default)]
pub struct NodeRegistry {
    /// Connected nodes: node_id -> entry
    nodes: RwLock<HashMap<String, NodeEntry>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for `node_id`.
    ///
    /// Returns the superseded entry, if any. The old channel is only
    /// dropped from the map; closing it is up to the caller.
    pub fn register(&self, node_id: String, channel: NodeChannel, info: NodeInfo) -> Option<NodeEntry> {
        let mut nodes = self.nodes.write();
        nodes.insert(node_id, NodeEntry { channel, info })
    }

    /// Remove every entry owned by `channel`; returns the removed ids.
    ///
    /// Compares connection identity, so a connection that was superseded
    /// under the same id removes nothing. Idempotent.
    pub fn unregister_by_channel(&self, channel: &NodeChannel) -> Vec<String> {
        let mut nodes = self.nodes.write();
        let mut removed = Vec::new();
        nodes.retain(|id, entry| {
            if entry.channel.same_channel(channel) {
                removed.push(id.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    pub fn lookup(&self, node_id: &str) -> Option<NodeChannel> {
        let nodes = self.nodes.read();
        nodes.get(node_id).map(|entry| entry.channel.clone())
    }

    /// Consistent copy of every (id, channel) pair, taken under one read lock
    pub fn snapshot_all(&self) -> Vec<(String, NodeChannel)> {
        let nodes = self.nodes.read();
        nodes
            .iter()
            .map(|(id, entry)| (id.clone(), entry.channel.clone()))
            .collect()
    }

    /// Id currently owned by `channel`, if registered
    pub fn node_id_for(&self, channel: &NodeChannel) -> Option<String> {
        let nodes = self.nodes.read();
        nodes
            .iter()
            .find(|(_, entry)| entry.channel.same_channel(channel))
            .map(|(id, _)| id.clone())
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.nodes.read().contains_key(node_id)
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    /// Entries sorted by node id
    pub fn summaries(&self) -> Vec<NodeSummary> {
        let nodes = self.nodes.read();
        let mut list: Vec<NodeSummary> = nodes
            .iter()
            .map(|(id, entry)| NodeSummary {
                node_id: id.clone(),
                connection_id: entry.channel.id().as_u64(),
                info: entry.info.clone(),
            })
            .collect();
        list.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        list
    }
}

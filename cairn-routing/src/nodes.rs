//! Cluster membership as seen by the allocation engine.
//!
//! Membership is delivered by an external collaborator. A node in
//! [`DiscoveryNodes`] is live; a node that left is simply absent.

use std::collections::{BTreeMap, BTreeSet};

use cairn_core::{NodeId, ShardId};
use im::OrdMap;
use serde::{Deserialize, Serialize};

/// Disk usage reported by a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskUsage {
    /// Capacity in bytes.
    pub total_bytes: u64,
    /// Used bytes.
    pub used_bytes: u64,
}

impl DiskUsage {
    /// Fraction of capacity in use, `0.0..=1.0`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn used_fraction(&self) -> f64 {
        if self.total_bytes == 0 {
            return 1.0;
        }
        self.used_bytes.min(self.total_bytes) as f64 / self.total_bytes as f64
    }
}

/// A live data node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryNode {
    /// Persistent id of the node's data location.
    pub id: NodeId,
    /// Human-readable name.
    pub name: String,
    /// Attributes used by filtering and awareness (e.g. `zone`).
    pub attributes: BTreeMap<String, String>,
    /// Disk usage, if reported.
    pub disk: Option<DiskUsage>,
    /// Shards whose data the node found in its data location when it joined.
    pub stored_shards: BTreeSet<ShardId>,
}

impl DiscoveryNode {
    /// Creates a node with no attributes and no stored data.
    #[must_use]
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            name: format!("node-{}", id.get()),
            attributes: BTreeMap::new(),
            disk: None,
            stored_shards: BTreeSet::new(),
        }
    }

    /// Adds an attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: &str, value: &str) -> Self {
        self.attributes.insert(key.to_string(), value.to_string());
        self
    }

    /// Sets disk usage.
    #[must_use]
    pub const fn with_disk(mut self, disk: DiskUsage) -> Self {
        self.disk = Some(disk);
        self
    }

    /// Declares shard data present in the node's data location.
    #[must_use]
    pub fn with_stored_shards(mut self, shards: impl IntoIterator<Item = ShardId>) -> Self {
        self.stored_shards.extend(shards);
        self
    }

    /// Returns true if the node's data location holds data for `shard_id`.
    #[must_use]
    pub fn has_shard_data(&self, shard_id: &ShardId) -> bool {
        self.stored_shards.contains(shard_id)
    }

    /// Looks up an attribute, resolving the `_id` and `_name` pseudo-attributes.
    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<String> {
        match key {
            "_id" => Some(self.id.get().to_string()),
            "_name" => Some(self.name.clone()),
            _ => self.attributes.get(key).cloned(),
        }
    }
}

/// The set of live nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryNodes {
    nodes: OrdMap<NodeId, DiscoveryNode>,
}

impl DiscoveryNodes {
    /// Creates an empty membership.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a node.
    pub fn add(&mut self, node: DiscoveryNode) {
        self.nodes.insert(node.id, node);
    }

    /// Removes a node.
    pub fn remove(&mut self, id: NodeId) -> Option<DiscoveryNode> {
        self.nodes.remove(&id)
    }

    /// Returns a live node.
    #[must_use]
    pub fn get(&self, id: NodeId) -> Option<&DiscoveryNode> {
        self.nodes.get(&id)
    }

    /// Returns a mutable reference to a live node.
    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut DiscoveryNode> {
        self.nodes.get_mut(&id)
    }

    /// Returns true if the node is live.
    #[must_use]
    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Iterates over live nodes in id order.
    pub fn iter(&self) -> impl Iterator<Item = &DiscoveryNode> {
        self.nodes.values()
    }

    /// Returns the ids of live nodes in order.
    #[must_use]
    pub fn ids(&self) -> Vec<NodeId> {
        self.nodes.keys().copied().collect()
    }

    /// Returns the number of live nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if no node is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl FromIterator<DiscoveryNode> for DiscoveryNodes {
    fn from_iter<T: IntoIterator<Item = DiscoveryNode>>(iter: T) -> Self {
        let mut nodes = Self::new();
        for node in iter {
            nodes.add(node);
        }
        nodes
    }
}

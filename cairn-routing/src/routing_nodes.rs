//! Node-centric view of the routing table.
//!
//! Derived from [`RoutingTable`] at the start of every round and kept in
//! step with it while the round mutates placements. Never a source of
//! truth on its own.

use std::collections::BTreeMap;

use cairn_core::{NodeId, ShardId};

use crate::routing_table::RoutingTable;
use crate::shard::{CopyId, ShardRouting, ShardState};

/// One copy as seen from the node hosting it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeEntry {
    /// The hosted copy.
    pub copy: CopyId,
    /// State of the copy on this node.
    pub state: ShardState,
    /// Whether the copy holds the primary role.
    pub primary: bool,
    /// Whether this node is the copy's relocation target.
    pub relocation_target: bool,
}

impl NodeEntry {
    /// Returns true if the node is recovering this copy.
    #[must_use]
    pub const fn is_recovering(&self) -> bool {
        self.relocation_target || matches!(self.state, ShardState::Initializing)
    }
}

/// Mapping from node to the copies it hosts.
#[derive(Debug, Clone, Default)]
pub struct RoutingNodes {
    nodes: BTreeMap<NodeId, Vec<NodeEntry>>,
}

impl RoutingNodes {
    /// Builds the view from a routing table.
    #[must_use]
    pub fn build(table: &RoutingTable) -> Self {
        let mut nodes = Self::default();
        for routing in table.iter() {
            nodes.add(routing);
        }
        nodes
    }

    /// Replaces `old` with `new` in the view.
    pub fn update(&mut self, old: &ShardRouting, new: &ShardRouting) {
        self.remove(old);
        self.add(new);
    }

    /// Adds every placement of a copy.
    pub fn add(&mut self, routing: &ShardRouting) {
        if let Some(node) = routing.current_node() {
            self.nodes.entry(node).or_default().push(NodeEntry {
                copy: routing.copy_id().clone(),
                state: routing.state(),
                primary: routing.is_primary(),
                relocation_target: false,
            });
        }
        if let Some(target) = routing.relocating_node() {
            self.nodes.entry(target).or_default().push(NodeEntry {
                copy: routing.copy_id().clone(),
                state: ShardState::Initializing,
                primary: routing.is_primary(),
                relocation_target: true,
            });
        }
    }

    /// Removes every placement of a copy.
    pub fn remove(&mut self, routing: &ShardRouting) {
        for node in routing.occupied_nodes() {
            if let Some(entries) = self.nodes.get_mut(&node) {
                entries.retain(|entry| &entry.copy != routing.copy_id());
                if entries.is_empty() {
                    self.nodes.remove(&node);
                }
            }
        }
    }

    /// Returns the copies occupying a node.
    #[must_use]
    pub fn entries(&self, node: NodeId) -> &[NodeEntry] {
        self.nodes.get(&node).map_or(&[], Vec::as_slice)
    }

    /// Returns true if the node hosts any copy of the shard.
    #[must_use]
    pub fn hosts_shard(&self, node: NodeId, shard_id: &ShardId) -> bool {
        self.entries(node)
            .iter()
            .any(|entry| &entry.copy.shard_id == shard_id)
    }

    /// Peer recoveries into a node: initializing replicas and relocation targets.
    #[must_use]
    pub fn incoming_recoveries(&self, node: NodeId) -> usize {
        self.entries(node)
            .iter()
            .filter(|entry| entry.is_recovering() && (entry.relocation_target || !entry.primary))
            .count()
    }

    /// Primaries initializing on a node from its own store.
    #[must_use]
    pub fn initializing_primaries(&self, node: NodeId) -> usize {
        self.entries(node)
            .iter()
            .filter(|entry| entry.primary && !entry.relocation_target && entry.is_recovering())
            .count()
    }

    /// Iterates over nodes occupied by at least one copy.
    pub fn occupied_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }
}

//! Cluster state snapshot.
//!
//! One immutable value per published version. Every component receives the
//! snapshot it works on explicitly; nothing reads a global.

use cairn_core::{NodeId, ShardId};
use serde::{Deserialize, Serialize};

use crate::metadata::{ClusterSettings, Metadata};
use crate::nodes::{DiscoveryNode, DiscoveryNodes};
use crate::retry::FailureLedger;
use crate::routing_table::RoutingTable;
use crate::shard::{CopyId, ShardRouting};
use crate::unassigned::{UnassignedInfo, UnassignedRegistry};

/// A versioned snapshot of everything the allocation engine owns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterState {
    pub(crate) version: u64,
    pub(crate) nodes: DiscoveryNodes,
    pub(crate) metadata: Metadata,
    pub(crate) routing_table: RoutingTable,
    pub(crate) unassigned: UnassignedRegistry,
    pub(crate) failures: FailureLedger,
}

impl ClusterState {
    /// Creates the version-zero state of a new cluster.
    #[must_use]
    pub fn new(settings: ClusterSettings) -> Self {
        Self {
            metadata: Metadata::new(settings),
            ..Self::default()
        }
    }

    /// Returns the snapshot version. Increases by one per round.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Returns live nodes.
    #[must_use]
    pub const fn nodes(&self) -> &DiscoveryNodes {
        &self.nodes
    }

    /// Returns a live node.
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&DiscoveryNode> {
        self.nodes.get(id)
    }

    /// Returns index and cluster metadata.
    #[must_use]
    pub const fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Returns the routing table.
    #[must_use]
    pub const fn routing_table(&self) -> &RoutingTable {
        &self.routing_table
    }

    /// Returns the unassigned registry.
    #[must_use]
    pub const fn unassigned(&self) -> &UnassignedRegistry {
        &self.unassigned
    }

    /// Returns the failure ledger.
    #[must_use]
    pub const fn failures(&self) -> &FailureLedger {
        &self.failures
    }

    /// Returns one copy.
    #[must_use]
    pub fn routing(&self, copy: &CopyId) -> Option<&ShardRouting> {
        self.routing_table.get(copy)
    }

    /// Returns the copies of a shard.
    #[must_use]
    pub fn shard_copies(&self, shard_id: &ShardId) -> &[ShardRouting] {
        self.routing_table.shard(shard_id).unwrap_or(&[])
    }

    /// Returns the unassigned info of a copy.
    #[must_use]
    pub fn unassigned_info(&self, copy: &CopyId) -> Option<&UnassignedInfo> {
        self.unassigned.get(copy)
    }

    /// Number of copies held back by the node-left delay.
    #[must_use]
    pub fn delayed_unassigned_count(&self) -> usize {
        self.unassigned.delayed_count()
    }
}

//! Cluster health summary derived from a snapshot.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::shard::ShardState;
use crate::state::ClusterState;

/// Overall allocation health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Every copy is active.
    Green,
    /// Every primary is active; some replica is not.
    Yellow,
    /// Some primary is not active.
    Red,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Green => f.write_str("green"),
            Self::Yellow => f.write_str("yellow"),
            Self::Red => f.write_str("red"),
        }
    }
}

/// Aggregate counts over every copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterHealth {
    /// Snapshot version the counts were taken from.
    pub version: u64,
    /// Overall status.
    pub status: HealthStatus,
    /// Live nodes.
    pub number_of_nodes: usize,
    /// Active primaries.
    pub active_primary_shards: usize,
    /// Active copies, primaries included.
    pub active_shards: usize,
    /// Copies being moved.
    pub relocating_shards: usize,
    /// Copies recovering on their first node.
    pub initializing_shards: usize,
    /// Copies with no node.
    pub unassigned_shards: usize,
    /// Unassigned copies held back by the node-left delay.
    pub delayed_unassigned_shards: usize,
}

impl ClusterHealth {
    /// Summarizes a snapshot.
    #[must_use]
    pub fn from_state(state: &ClusterState) -> Self {
        let mut health = Self {
            version: state.version(),
            status: HealthStatus::Green,
            number_of_nodes: state.nodes().len(),
            active_primary_shards: 0,
            active_shards: 0,
            relocating_shards: 0,
            initializing_shards: 0,
            unassigned_shards: 0,
            delayed_unassigned_shards: state.delayed_unassigned_count(),
        };

        for routing in state.routing_table().iter() {
            match routing.state() {
                ShardState::Unassigned => health.unassigned_shards += 1,
                ShardState::Initializing => health.initializing_shards += 1,
                ShardState::Started => {}
                ShardState::Relocating => health.relocating_shards += 1,
            }
            if routing.is_active() {
                health.active_shards += 1;
                if routing.is_primary() {
                    health.active_primary_shards += 1;
                }
            } else {
                let status = if routing.is_primary() {
                    HealthStatus::Red
                } else {
                    HealthStatus::Yellow
                };
                health.status = health.status.max(status);
            }
        }
        health
    }
}

#[cfg(test)]
mod tests {
    use cairn_core::{AllocationLimits, NodeId, ShardId};

    use super::*;
    use crate::allocation::RoutingAllocation;
    use crate::diff::AllocationCause;
    use crate::metadata::{ClusterSettings, IndexMetadata, IndexSettings};
    use crate::nodes::DiscoveryNode;
    use crate::shard::CopyId;

    #[test]
    fn test_status_progression() {
        let mut state = ClusterState::new(ClusterSettings::default());
        state.nodes.add(DiscoveryNode::new(NodeId::new(1)));
        state.nodes.add(DiscoveryNode::new(NodeId::new(2)));
        let mut allocation = RoutingAllocation::new(state, AllocationLimits::new(), 0);
        allocation
            .add_index(IndexMetadata::new("test", IndexSettings::new(1, 1)))
            .unwrap();

        let health = ClusterHealth::from_state(allocation.state());
        assert_eq!(health.status, HealthStatus::Red);
        assert_eq!(health.unassigned_shards, 2);

        let primary = CopyId::new(ShardId::new("test", 0), 0);
        let replica = CopyId::new(ShardId::new("test", 0), 1);
        allocation
            .initialize(&primary, NodeId::new(1), AllocationCause::Automatic)
            .unwrap();
        assert_eq!(ClusterHealth::from_state(allocation.state()).initializing_shards, 1);

        allocation.start(&primary).unwrap();
        let health = ClusterHealth::from_state(allocation.state());
        assert_eq!(health.status, HealthStatus::Yellow);
        assert_eq!(health.active_primary_shards, 1);

        allocation
            .initialize(&replica, NodeId::new(2), AllocationCause::Automatic)
            .unwrap();
        allocation.start(&replica).unwrap();
        let health = ClusterHealth::from_state(allocation.state());
        assert_eq!(health.status, HealthStatus::Green);
        assert_eq!(health.active_shards, 2);
        assert_eq!(health.unassigned_shards, 0);
        assert_eq!(health.status.to_string(), "green");
    }
}

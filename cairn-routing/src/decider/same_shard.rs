use crate::allocation::RoutingAllocation;
use crate::decider::{AllocationDecider, Decision};
use crate::nodes::DiscoveryNode;
use crate::shard::ShardRouting;

/// Never places two copies of a shard on one node.
#[derive(Debug, Clone, Copy, Default)]
pub struct SameShardDecider;

impl AllocationDecider for SameShardDecider {
    fn name(&self) -> &'static str {
        "same_shard"
    }

    fn can_allocate(
        &self,
        shard: &ShardRouting,
        node: &DiscoveryNode,
        allocation: &RoutingAllocation,
    ) -> Decision {
        if allocation.routing_nodes().hosts_shard(node.id, shard.shard_id()) {
            return Decision::no(
                self.name(),
                format!("{} already hosts a copy of {}", node.id, shard.shard_id()),
            );
        }
        Decision::Yes
    }
}

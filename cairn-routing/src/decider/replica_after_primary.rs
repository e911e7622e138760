use crate::allocation::RoutingAllocation;
use crate::decider::{AllocationDecider, Decision};
use crate::nodes::DiscoveryNode;
use crate::shard::ShardRouting;

/// Replicas recover from the primary, so they wait until it is active.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplicaAfterPrimaryActiveDecider;

impl AllocationDecider for ReplicaAfterPrimaryActiveDecider {
    fn name(&self) -> &'static str {
        "replica_after_primary_active"
    }

    fn can_allocate(
        &self,
        shard: &ShardRouting,
        _node: &DiscoveryNode,
        allocation: &RoutingAllocation,
    ) -> Decision {
        if shard.is_primary() || allocation.has_active_primary(shard.shard_id()) {
            Decision::Yes
        } else {
            Decision::no(
                self.name(),
                format!("primary of {} is not active", shard.shard_id()),
            )
        }
    }
}

use crate::allocation::RoutingAllocation;
use crate::decider::{AllocationDecider, Decision};
use crate::metadata::AllocationEnable;
use crate::nodes::DiscoveryNode;
use crate::shard::ShardRouting;

/// Applies the index or cluster `allocation_enable` switch.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnableDecider;

impl AllocationDecider for EnableDecider {
    fn name(&self) -> &'static str {
        "enable"
    }

    fn can_allocate(
        &self,
        shard: &ShardRouting,
        _node: &DiscoveryNode,
        allocation: &RoutingAllocation,
    ) -> Decision {
        let metadata = allocation.metadata();
        let allowed = match metadata.allocation_enable(shard.shard_id()) {
            AllocationEnable::All => true,
            AllocationEnable::Primaries => shard.is_primary(),
            AllocationEnable::NewPrimaries => {
                shard.is_primary() && !metadata.is_activated(shard.shard_id())
            }
            AllocationEnable::None => false,
        };

        if allowed {
            Decision::Yes
        } else {
            Decision::no(
                self.name(),
                format!(
                    "allocation is {:?} for {}",
                    metadata.allocation_enable(shard.shard_id()),
                    shard.shard_id().index
                ),
            )
        }
    }
}

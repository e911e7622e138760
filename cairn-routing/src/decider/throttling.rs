use cairn_core::AllocationLimits;

use crate::allocation::RoutingAllocation;
use crate::decider::{AllocationDecider, Decision};
use crate::nodes::DiscoveryNode;
use crate::shard::ShardRouting;

/// Caps in-flight recoveries per node.
///
/// Primaries initializing from the node's own store count against
/// `node_initial_primaries_recoveries`; replica recoveries and relocation
/// targets count against `node_concurrent_recoveries`.
#[derive(Debug, Clone, Copy)]
pub struct ThrottlingDecider {
    concurrent_recoveries: u32,
    initial_primaries_recoveries: u32,
}

impl ThrottlingDecider {
    /// Creates the decider from the configured limits.
    #[must_use]
    pub const fn new(limits: &AllocationLimits) -> Self {
        Self {
            concurrent_recoveries: limits.node_concurrent_recoveries,
            initial_primaries_recoveries: limits.node_initial_primaries_recoveries,
        }
    }
}

impl AllocationDecider for ThrottlingDecider {
    fn name(&self) -> &'static str {
        "throttling"
    }

    fn can_allocate(
        &self,
        shard: &ShardRouting,
        node: &DiscoveryNode,
        allocation: &RoutingAllocation,
    ) -> Decision {
        let nodes = allocation.routing_nodes();

        if shard.is_primary() && shard.is_unassigned() {
            let in_flight = nodes.initializing_primaries(node.id);
            if in_flight >= self.initial_primaries_recoveries as usize {
                return Decision::throttle(
                    self.name(),
                    format!(
                        "{} already initializes {in_flight} primaries, limit {}",
                        node.id, self.initial_primaries_recoveries
                    ),
                );
            }
            return Decision::Yes;
        }

        let in_flight = nodes.incoming_recoveries(node.id);
        if in_flight >= self.concurrent_recoveries as usize {
            return Decision::throttle(
                self.name(),
                format!(
                    "{} already has {in_flight} incoming recoveries, limit {}",
                    node.id, self.concurrent_recoveries
                ),
            );
        }
        Decision::Yes
    }
}

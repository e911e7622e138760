use std::collections::BTreeSet;

use crate::allocation::RoutingAllocation;
use crate::decider::{AllocationDecider, Decision};
use crate::nodes::DiscoveryNode;
use crate::shard::ShardRouting;

/// Spreads a shard's copies across the values of each awareness attribute.
///
/// With `n` copies and `v` distinct values among live nodes, no value may
/// hold more than `ceil(n / v)` copies. Nodes lacking the attribute never
/// receive copies while awareness is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct AwarenessDecider;

impl AllocationDecider for AwarenessDecider {
    fn name(&self) -> &'static str {
        "awareness"
    }

    fn can_allocate(
        &self,
        shard: &ShardRouting,
        node: &DiscoveryNode,
        allocation: &RoutingAllocation,
    ) -> Decision {
        let attributes = &allocation.metadata().cluster().awareness_attributes;
        let Some(settings) = allocation.metadata().settings_for(shard.shard_id()) else {
            return Decision::Yes;
        };
        let copies = settings.copies_per_shard() as usize;
        let siblings = allocation
            .routing_table()
            .shard(shard.shard_id())
            .unwrap_or(&[]);

        for attribute in attributes {
            let Some(value) = node.attribute(attribute) else {
                return Decision::no(
                    self.name(),
                    format!("{} has no {attribute} attribute", node.id),
                );
            };

            let distinct: BTreeSet<String> = allocation
                .nodes()
                .iter()
                .filter_map(|candidate| candidate.attribute(attribute))
                .collect();
            let limit = copies.div_ceil(distinct.len().max(1));

            // Where each other copy will live once in-flight moves finish.
            let in_value = siblings
                .iter()
                .filter(|sibling| sibling.copy_id() != shard.copy_id())
                .filter_map(|sibling| sibling.relocating_node().or_else(|| sibling.current_node()))
                .filter_map(|id| allocation.nodes().get(id))
                .filter(|host| host.attribute(attribute).as_deref() == Some(value.as_str()))
                .count();

            if in_value + 1 > limit {
                return Decision::no(
                    self.name(),
                    format!(
                        "{attribute}={value} would hold {} of {copies} copies, limit {limit}",
                        in_value + 1
                    ),
                );
            }
        }
        Decision::Yes
    }
}

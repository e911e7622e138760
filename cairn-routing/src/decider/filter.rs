use std::collections::BTreeMap;

use crate::allocation::RoutingAllocation;
use crate::decider::{AllocationDecider, Decision};
use crate::nodes::DiscoveryNode;
use crate::shard::ShardRouting;

/// Applies the index's `require`, `include` and `exclude` attribute filters.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilterDecider;

fn matches(node: &DiscoveryNode, key: &str, values: &[String]) -> bool {
    node.attribute(key)
        .is_some_and(|actual| values.iter().any(|value| *value == actual))
}

fn describe(filter: &BTreeMap<String, Vec<String>>) -> String {
    filter
        .iter()
        .map(|(key, values)| format!("{key}:[{}]", values.join(",")))
        .collect::<Vec<_>>()
        .join(" ")
}

impl AllocationDecider for FilterDecider {
    fn name(&self) -> &'static str {
        "filter"
    }

    fn can_allocate(
        &self,
        shard: &ShardRouting,
        node: &DiscoveryNode,
        allocation: &RoutingAllocation,
    ) -> Decision {
        let Some(settings) = allocation.metadata().settings_for(shard.shard_id()) else {
            return Decision::Yes;
        };
        let filters = &settings.filters;

        if let Some((key, _)) = filters
            .require
            .iter()
            .find(|(key, values)| !matches(node, key, values))
        {
            return Decision::no(
                self.name(),
                format!("{} does not match require filter on {key}", node.id),
            );
        }
        if !filters.include.is_empty()
            && !filters
                .include
                .iter()
                .any(|(key, values)| matches(node, key, values))
        {
            return Decision::no(
                self.name(),
                format!("{} matches no include filter {}", node.id, describe(&filters.include)),
            );
        }
        if let Some((key, _)) = filters
            .exclude
            .iter()
            .find(|(key, values)| matches(node, key, values))
        {
            return Decision::no(
                self.name(),
                format!("{} matches exclude filter on {key}", node.id),
            );
        }
        Decision::Yes
    }
}

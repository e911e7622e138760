use cairn_core::AllocationLimits;

use crate::allocation::RoutingAllocation;
use crate::decider::{AllocationDecider, Decision};
use crate::nodes::DiscoveryNode;
use crate::shard::ShardRouting;

/// Keeps copies off nodes that are running out of disk.
///
/// Above the high watermark nothing is placed. Between the low and high
/// watermarks only primaries of never-activated shards are placed, since
/// they start empty.
#[derive(Debug, Clone, Copy)]
pub struct DiskThresholdDecider {
    low_watermark: f64,
    high_watermark: f64,
}

impl DiskThresholdDecider {
    /// Creates the decider from the configured watermarks.
    #[must_use]
    pub const fn new(limits: &AllocationLimits) -> Self {
        Self {
            low_watermark: limits.disk_low_watermark,
            high_watermark: limits.disk_high_watermark,
        }
    }
}

impl AllocationDecider for DiskThresholdDecider {
    fn name(&self) -> &'static str {
        "disk_threshold"
    }

    fn can_allocate(
        &self,
        shard: &ShardRouting,
        node: &DiscoveryNode,
        allocation: &RoutingAllocation,
    ) -> Decision {
        let Some(disk) = node.disk else {
            return Decision::Yes;
        };
        let used = disk.used_fraction();

        if used >= self.high_watermark {
            return Decision::no(
                self.name(),
                format!("{} disk usage {used:.2} exceeds high watermark {:.2}", node.id, self.high_watermark),
            );
        }
        let new_primary = shard.is_primary() && !allocation.metadata().is_activated(shard.shard_id());
        if used >= self.low_watermark && !new_primary {
            return Decision::no(
                self.name(),
                format!("{} disk usage {used:.2} exceeds low watermark {:.2}", node.id, self.low_watermark),
            );
        }
        Decision::Yes
    }
}

#[cfg(test)]
mod tests {
    use cairn_core::NodeId;

    use super::*;
    use crate::decider::test_support::{allocation, node, routing, start};
    use crate::metadata::{ClusterSettings, IndexSettings};
    use crate::nodes::DiskUsage;

    fn disk(used_percent: u64) -> DiskUsage {
        DiskUsage {
            total_bytes: 100,
            used_bytes: used_percent,
        }
    }

    fn nodes() -> Vec<DiscoveryNode> {
        vec![
            DiscoveryNode::new(NodeId::new(1)).with_disk(disk(10)),
            DiscoveryNode::new(NodeId::new(2)).with_disk(disk(87)),
            DiscoveryNode::new(NodeId::new(3)).with_disk(disk(95)),
            DiscoveryNode::new(NodeId::new(4)),
        ]
    }

    #[test]
    fn test_watermarks() {
        let mut allocation = allocation(nodes(), ClusterSettings::default(), IndexSettings::new(1, 1));
        let decider = DiskThresholdDecider::new(&AllocationLimits::new());

        let primary = routing(&allocation, 0, 0);
        assert!(decider.can_allocate(&primary, &node(&allocation, 1), &allocation).is_yes());
        // A new primary may use the space between the watermarks.
        assert!(decider.can_allocate(&primary, &node(&allocation, 2), &allocation).is_yes());
        assert!(decider.can_allocate(&primary, &node(&allocation, 3), &allocation).is_no());
        assert!(decider.can_allocate(&primary, &node(&allocation, 4), &allocation).is_yes());

        start(&mut allocation, 0, 0, 1);
        let replica = routing(&allocation, 0, 1);
        assert!(decider.can_allocate(&replica, &node(&allocation, 2), &allocation).is_no());
        assert!(decider.can_allocate(&replica, &node(&allocation, 4), &allocation).is_yes());
    }
}

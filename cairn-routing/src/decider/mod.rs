//! Allocation deciders.
//!
//! Each decider answers one question about placing a copy on a node and
//! returns a [`Decision`]. [`AllocationDeciders`] asks every registered
//! decider in order and keeps the most restrictive answer:
//! `NO > THROTTLE > YES`. The first `NO` ends the evaluation.
//!
//! Deciders are pure: they read the round's [`RoutingAllocation`] and hold
//! no state referencing shards. New deciders plug in through
//! [`AllocationDeciders::push`] without touching the orchestrator.

mod awareness;
mod disk;
mod enable;
mod filter;
mod replica_after_primary;
mod same_shard;
mod throttling;

use std::fmt;

use cairn_core::AllocationLimits;
use tracing::trace;

use crate::allocation::RoutingAllocation;
use crate::nodes::DiscoveryNode;
use crate::shard::ShardRouting;

pub use awareness::AwarenessDecider;
pub use disk::DiskThresholdDecider;
pub use enable::EnableDecider;
pub use filter::FilterDecider;
pub use replica_after_primary::ReplicaAfterPrimaryActiveDecider;
pub use same_shard::SameShardDecider;
pub use throttling::ThrottlingDecider;

/// Answer of a decider for one (copy, node) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The placement is allowed now.
    Yes,
    /// The placement is allowed but not now.
    Throttle {
        /// Deciding component.
        decider: &'static str,
        /// Explanation.
        reason: String,
    },
    /// The placement is not allowed.
    No {
        /// Vetoing component.
        decider: &'static str,
        /// Explanation.
        reason: String,
    },
}

impl Decision {
    /// Builds a `NO` decision.
    #[must_use]
    pub fn no(decider: &'static str, reason: impl Into<String>) -> Self {
        Self::No {
            decider,
            reason: reason.into(),
        }
    }

    /// Builds a `THROTTLE` decision.
    #[must_use]
    pub fn throttle(decider: &'static str, reason: impl Into<String>) -> Self {
        Self::Throttle {
            decider,
            reason: reason.into(),
        }
    }

    /// Returns true for `YES`.
    #[must_use]
    pub const fn is_yes(&self) -> bool {
        matches!(self, Self::Yes)
    }

    /// Returns true for `NO`.
    #[must_use]
    pub const fn is_no(&self) -> bool {
        matches!(self, Self::No { .. })
    }

    /// Returns true for `THROTTLE`.
    #[must_use]
    pub const fn is_throttle(&self) -> bool {
        matches!(self, Self::Throttle { .. })
    }

    const fn severity(&self) -> u8 {
        match self {
            Self::Yes => 0,
            Self::Throttle { .. } => 1,
            Self::No { .. } => 2,
        }
    }

    /// Combines two decisions, keeping the more restrictive one.
    /// On a tie the receiver wins.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Yes => f.write_str("YES"),
            Self::Throttle { decider, reason } => write!(f, "THROTTLE [{decider}]: {reason}"),
            Self::No { decider, reason } => write!(f, "NO [{decider}]: {reason}"),
        }
    }
}

/// A placement predicate.
pub trait AllocationDecider: fmt::Debug + Send + Sync {
    /// Short name reported with `NO` and `THROTTLE` answers.
    fn name(&self) -> &'static str;

    /// Decides whether `shard` may be placed on `node`.
    ///
    /// For a relocation, `shard` is the started copy and `node` the target.
    fn can_allocate(
        &self,
        shard: &ShardRouting,
        node: &DiscoveryNode,
        allocation: &RoutingAllocation,
    ) -> Decision;
}

/// Ordered set of deciders.
#[derive(Debug, Default)]
pub struct AllocationDeciders {
    deciders: Vec<Box<dyn AllocationDecider>>,
}

impl AllocationDeciders {
    /// Creates an empty set. Every placement is allowed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the default set.
    #[must_use]
    pub fn with_defaults(limits: &AllocationLimits) -> Self {
        let mut deciders = Self::new();
        deciders.push(EnableDecider);
        deciders.push(ReplicaAfterPrimaryActiveDecider);
        deciders.push(SameShardDecider);
        deciders.push(FilterDecider);
        deciders.push(AwarenessDecider);
        deciders.push(DiskThresholdDecider::new(limits));
        deciders.push(ThrottlingDecider::new(limits));
        deciders
    }

    /// Registers a decider after the existing ones.
    pub fn push(&mut self, decider: impl AllocationDecider + 'static) {
        self.deciders.push(Box::new(decider));
    }

    /// Returns the registered decider names in evaluation order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.deciders.iter().map(|decider| decider.name()).collect()
    }

    /// Combined decision of every decider.
    #[must_use]
    pub fn can_allocate(
        &self,
        shard: &ShardRouting,
        node: &DiscoveryNode,
        allocation: &RoutingAllocation,
    ) -> Decision {
        let mut combined = Decision::Yes;
        for decider in &self.deciders {
            let decision = decider.can_allocate(shard, node, allocation);
            if decision.is_no() {
                trace!(copy = %shard.copy_id(), node = %node.id, %decision, "placement vetoed");
                return decision;
            }
            combined = combined.merge(decision);
        }
        combined
    }
}


#[cfg(test)]
mod tests {
    use cairn_core::NodeId;

    use super::test_support::{allocation, node, routing};
    use super::*;
    use crate::metadata::{ClusterSettings, IndexSettings};

    #[derive(Debug)]
    struct Fixed(Decision);

    impl AllocationDecider for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn can_allocate(&self, _: &ShardRouting, _: &DiscoveryNode, _: &RoutingAllocation) -> Decision {
            self.0.clone()
        }
    }

    #[test]
    fn test_merge_precedence() {
        let throttle = Decision::throttle("a", "busy");
        let no = Decision::no("b", "never");

        assert_eq!(Decision::Yes.merge(throttle.clone()), throttle);
        assert_eq!(throttle.clone().merge(Decision::Yes), throttle);
        assert_eq!(throttle.clone().merge(no.clone()), no);
        assert_eq!(no.clone().merge(Decision::throttle("c", "later")), no);
    }

    #[test]
    fn test_combined_decision_is_most_restrictive() {
        let allocation = allocation(
            vec![DiscoveryNode::new(NodeId::new(1))],
            ClusterSettings::default(),
            IndexSettings::new(1, 0),
        );
        let shard = routing(&allocation, 0, 0);
        let target = node(&allocation, 1);

        let mut deciders = AllocationDeciders::new();
        assert!(deciders.can_allocate(&shard, &target, &allocation).is_yes());

        deciders.push(Fixed(Decision::throttle("fixed", "busy")));
        assert!(deciders.can_allocate(&shard, &target, &allocation).is_throttle());

        deciders.push(Fixed(Decision::no("fixed", "never")));
        deciders.push(Fixed(Decision::Yes));
        let decision = deciders.can_allocate(&shard, &target, &allocation);
        assert!(decision.is_no());
        assert_eq!(decision.to_string(), "NO [fixed]: never");
    }

    #[test]
    fn test_default_set_order() {
        let deciders = AllocationDeciders::with_defaults(&AllocationLimits::new());
        assert_eq!(
            deciders.names(),
            vec![
                "enable",
                "replica_after_primary_active",
                "same_shard",
                "filter",
                "awareness",
                "disk_threshold",
                "throttling",
            ]
        );
    }
}

//! Structural checks run on every snapshot before it is published.

use std::collections::BTreeSet;

use cairn_core::NodeId;

use crate::error::{RoutingError, RoutingResult};
use crate::shard::CopyId;
use crate::state::ClusterState;

fn violation(invariant: &'static str, detail: String) -> RoutingError {
    RoutingError::InvariantViolation { invariant, detail }
}

/// Verifies a snapshot.
///
/// # Errors
///
/// Returns `InvariantViolation` naming the first broken rule.
pub fn check(state: &ClusterState) -> RoutingResult<()> {
    let metadata = state.metadata();

    for (shard_id, copies) in state.routing_table().shards() {
        let settings = metadata.settings_for(shard_id).ok_or_else(|| {
            violation("shard belongs to an index", format!("{shard_id} has no index metadata"))
        })?;
        if shard_id.shard >= settings.number_of_shards {
            return Err(violation(
                "shard belongs to an index",
                format!("{shard_id} beyond {} shards", settings.number_of_shards),
            ));
        }
        if copies.len() != settings.copies_per_shard() as usize {
            return Err(violation(
                "copy count",
                format!("{shard_id} has {} copies, expected {}", copies.len(), settings.copies_per_shard()),
            ));
        }

        let primaries = copies.iter().filter(|copy| copy.is_primary()).count();
        if primaries != 1 {
            return Err(violation(
                "single primary",
                format!("{shard_id} has {primaries} primary copies"),
            ));
        }

        let mut occupied = BTreeSet::<NodeId>::new();
        for copy in copies {
            for node in copy.occupied_nodes() {
                if !occupied.insert(node) {
                    return Err(violation(
                        "one copy per node",
                        format!("{node} hosts two copies of {shard_id}"),
                    ));
                }
                if !state.nodes().contains(node) {
                    return Err(violation(
                        "assigned to live node",
                        format!("{} is on departed {node}", copy.copy_id()),
                    ));
                }
            }
        }
    }

    for index in metadata.indices() {
        for shard in 0..index.settings.number_of_shards {
            let shard_id = cairn_core::ShardId::new(index.name.clone(), shard);
            if !state.routing_table().contains_shard(&shard_id) {
                return Err(violation("copy count", format!("{shard_id} has no copies")));
            }
        }
    }

    let unassigned: BTreeSet<&CopyId> = state
        .routing_table()
        .unassigned()
        .map(|routing| routing.copy_id())
        .collect();
    let registered: BTreeSet<&CopyId> = state.unassigned().iter().map(|(copy, _)| copy).collect();
    if unassigned != registered {
        let missing: Vec<_> = unassigned.difference(&registered).collect();
        let stale: Vec<_> = registered.difference(&unassigned).collect();
        return Err(violation(
            "unassigned info iff unassigned",
            format!("missing info for {missing:?}, stale info for {stale:?}"),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use cairn_core::{AllocationLimits, ShardId};

    use super::*;
    use crate::allocation::RoutingAllocation;
    use crate::diff::AllocationCause;
    use crate::metadata::{ClusterSettings, IndexMetadata, IndexSettings};
    use crate::nodes::DiscoveryNode;
    use crate::shard::ShardRouting;

    fn state() -> ClusterState {
        let mut state = ClusterState::new(ClusterSettings::default());
        state.nodes.add(DiscoveryNode::new(NodeId::new(1)));
        state.nodes.add(DiscoveryNode::new(NodeId::new(2)));
        let mut allocation = RoutingAllocation::new(state, AllocationLimits::new(), 0);
        allocation
            .add_index(IndexMetadata::new("test", IndexSettings::new(1, 1)))
            .unwrap();
        allocation
            .initialize(&CopyId::new(ShardId::new("test", 0), 0), NodeId::new(1), AllocationCause::Automatic)
            .unwrap();
        allocation.into_parts().0
    }

    fn expect(state: &ClusterState, invariant: &str) {
        match check(state) {
            Err(RoutingError::InvariantViolation { invariant: actual, .. }) => assert_eq!(actual, invariant),
            other => panic!("expected {invariant} violation, got {other:?}"),
        }
    }

    #[test]
    fn test_valid_state_passes() {
        assert!(check(&state()).is_ok());
    }

    #[test]
    fn test_departed_node_detected() {
        let mut state = state();
        state.nodes.remove(NodeId::new(1));
        expect(&state, "assigned to live node");
    }

    #[test]
    fn test_missing_unassigned_info_detected() {
        let mut state = state();
        state.unassigned.clear(&CopyId::new(ShardId::new("test", 0), 1));
        expect(&state, "unassigned info iff unassigned");
    }

    #[test]
    fn test_two_copies_on_one_node_detected() {
        let mut state = state();
        let replica = ShardRouting::unassigned(
            CopyId::new(ShardId::new("test", 0), 1),
            crate::shard::ShardCopyRole::Replica,
        )
        .initialize(NodeId::new(1))
        .unwrap();
        state.routing_table.replace(replica).unwrap();
        state.unassigned.clear(&CopyId::new(ShardId::new("test", 0), 1));
        expect(&state, "one copy per node");
    }

    #[test]
    fn test_double_primary_detected() {
        let mut state = state();
        let replica = state
            .routing_table
            .get(&CopyId::new(ShardId::new("test", 0), 1))
            .cloned()
            .unwrap();
        let forged = ShardRouting::unassigned(replica.copy_id().clone(), crate::shard::ShardCopyRole::Primary);
        state.routing_table.replace(forged).unwrap();
        expect(&state, "single primary");
    }
}

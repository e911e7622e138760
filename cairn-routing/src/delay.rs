//! Delayed allocation after a node departure.
//!
//! No timers. Remaining delay is `timeout - (now - unassigned_at)`,
//! recomputed every time it is asked for, so a late or skipped round
//! cannot drift. Once a window has run out the copy's `delayed` flag is
//! cleared for the rest of its unassigned episode.

use crate::metadata::Metadata;
use crate::state::ClusterState;
use crate::unassigned::{UnassignedInfo, UnassignedReason, UnassignedRegistry};

/// Computes delay windows for unassigned copies.
#[derive(Debug, Clone, Copy, Default)]
pub struct DelayScheduler;

impl DelayScheduler {
    /// Remaining delay in microseconds; zero when the copy is eligible.
    #[must_use]
    pub fn remaining_delay_us(info: &UnassignedInfo, timeout_us: u64, now_us: u64) -> u64 {
        if !info.delayed || info.reason != UnassignedReason::NodeLeft {
            return 0;
        }
        let elapsed = now_us.saturating_sub(info.unassigned_at_us);
        timeout_us.saturating_sub(elapsed)
    }

    /// Returns true if automatic allocation may move the copy to any node.
    #[must_use]
    pub fn is_eligible_now(info: &UnassignedInfo, timeout_us: u64, now_us: u64) -> bool {
        Self::remaining_delay_us(info, timeout_us, now_us) == 0
    }

    /// Clears the `delayed` flag of every copy whose window has run out.
    ///
    /// Returns the number of copies still delayed.
    pub fn refresh(registry: &mut UnassignedRegistry, metadata: &Metadata, now_us: u64) -> usize {
        let expired: Vec<_> = registry
            .iter()
            .filter(|(_, info)| info.delayed)
            .filter(|(copy, info)| {
                let timeout_us = metadata
                    .settings_for(&copy.shard_id)
                    .map_or(0, |settings| settings.node_left_delay_us);
                Self::is_eligible_now(info, timeout_us, now_us)
            })
            .map(|(copy, _)| copy.clone())
            .collect();

        for copy in &expired {
            if let Some(info) = registry.get_mut(copy) {
                info.delayed = false;
            }
        }
        registry.delayed_count()
    }

    /// Earliest moment a currently delayed copy becomes eligible.
    #[must_use]
    pub fn next_expiry_us(state: &ClusterState) -> Option<u64> {
        state
            .unassigned()
            .iter()
            .filter(|(_, info)| info.delayed)
            .map(|(copy, info)| {
                let timeout_us = state
                    .metadata()
                    .settings_for(&copy.shard_id)
                    .map_or(0, |settings| settings.node_left_delay_us);
                info.unassigned_at_us.saturating_add(timeout_us)
            })
            .min()
    }
}

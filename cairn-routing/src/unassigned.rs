//! Unassigned shard registry.
//!
//! Holds an [`UnassignedInfo`] for every copy that is not hosted anywhere.
//! An entry exists iff the copy's state is `UNASSIGNED`; it is created when
//! the copy loses its placement and destroyed when the copy is assigned.
//!
//! The registry is a persistent map, so cloning it into a new snapshot is
//! O(1) and later edits never affect earlier snapshots.

use std::fmt;

use cairn_core::NodeId;
use im::OrdMap;
use serde::{Deserialize, Serialize};

use crate::shard::CopyId;

/// Why a copy became unassigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnassignedReason {
    /// Created with a new index.
    IndexCreated,
    /// Created by raising the replica count.
    ReplicaAdded,
    /// Its node failed to initialize it.
    AllocationFailed,
    /// Its hosting node left the cluster.
    NodeLeft,
    /// An operator cancelled its placement.
    RerouteCancelled,
    /// It was recovering from a primary that failed.
    PrimaryFailed,
}

impl fmt::Display for UnassignedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::IndexCreated => "INDEX_CREATED",
            Self::ReplicaAdded => "REPLICA_ADDED",
            Self::AllocationFailed => "ALLOCATION_FAILED",
            Self::NodeLeft => "NODE_LEFT",
            Self::RerouteCancelled => "REROUTE_CANCELLED",
            Self::PrimaryFailed => "PRIMARY_FAILED",
        };
        f.write_str(name)
    }
}

/// Outcome of the most recent placement attempt for an unassigned copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AllocationStatus {
    /// No round has considered the copy yet.
    NoAttempt,
    /// Withheld by the node-left delay.
    Delayed,
    /// Every candidate node was vetoed.
    DecidersNo,
    /// The best candidate was throttled.
    DecidersThrottled,
    /// No live node holds data for a previously allocated primary.
    NoValidShardCopy,
    /// The failure counter reached the retry limit.
    RetriesExhausted,
}

/// Metadata attached to an unassigned copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnassignedInfo {
    /// Why the copy is unassigned.
    pub reason: UnassignedReason,
    /// When the current unassigned episode began (microseconds).
    pub unassigned_at_us: u64,
    /// Consecutive failed initializations, mirrored from the failure ledger.
    pub failed_allocations: u32,
    /// Detail of the most recent failure.
    pub last_failure: Option<String>,
    /// Whether the node-left delay is still withholding the copy.
    pub delayed: bool,
    /// The node that hosted the copy before it became unassigned.
    pub last_allocated_node: Option<NodeId>,
    /// Result of the last placement attempt.
    pub status: AllocationStatus,
}

impl UnassignedInfo {
    /// Creates info for a new unassigned episode.
    #[must_use]
    pub const fn new(reason: UnassignedReason, unassigned_at_us: u64) -> Self {
        Self {
            reason,
            unassigned_at_us,
            failed_allocations: 0,
            last_failure: None,
            delayed: false,
            last_allocated_node: None,
            status: AllocationStatus::NoAttempt,
        }
    }

    /// Returns true if this episode began with a departure of `node`.
    #[must_use]
    pub fn is_departure_of(&self, node: NodeId) -> bool {
        self.reason == UnassignedReason::NodeLeft && self.last_allocated_node == Some(node)
    }
}

/// Parameters for opening or refreshing an unassigned episode.
#[derive(Debug, Clone)]
pub struct MarkUnassigned {
    /// Why the copy is unassigned.
    pub reason: UnassignedReason,
    /// Node that hosted the copy, if any.
    pub last_node: Option<NodeId>,
    /// Failure counter owned by the retry controller.
    pub failed_allocations: u32,
    /// Detail of the most recent failure.
    pub last_failure: Option<String>,
    /// Whether the owning index has a non-zero node-left delay.
    pub delay_enabled: bool,
    /// Current time in microseconds.
    pub now_us: u64,
}

/// Registry of unassigned copies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnassignedRegistry {
    entries: OrdMap<CopyId, UnassignedInfo>,
}

impl UnassignedRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that a copy is unassigned and returns its info.
    ///
    /// An existing entry keeps its timestamp unless this is a fresh node
    /// departure distinct from the one that opened the episode; then the
    /// timestamp (and with it the delay window) restarts.
    pub fn mark_unassigned(&mut self, copy: &CopyId, mark: MarkUnassigned) -> UnassignedInfo {
        let fresh_departure = |prior: &UnassignedInfo| {
            mark.reason == UnassignedReason::NodeLeft
                && !mark.last_node.is_some_and(|node| prior.is_departure_of(node))
        };

        let info = match self.entries.get(copy) {
            Some(prior) if !fresh_departure(prior) => UnassignedInfo {
                reason: mark.reason,
                failed_allocations: mark.failed_allocations,
                last_failure: mark.last_failure.or_else(|| prior.last_failure.clone()),
                last_allocated_node: mark.last_node.or(prior.last_allocated_node),
                ..prior.clone()
            },
            _ => UnassignedInfo {
                failed_allocations: mark.failed_allocations,
                last_failure: mark.last_failure,
                delayed: mark.reason == UnassignedReason::NodeLeft && mark.delay_enabled,
                last_allocated_node: mark.last_node,
                ..UnassignedInfo::new(mark.reason, mark.now_us)
            },
        };

        self.entries.insert(copy.clone(), info.clone());
        info
    }

    /// Removes a copy's entry when it leaves `UNASSIGNED`.
    pub fn clear(&mut self, copy: &CopyId) -> Option<UnassignedInfo> {
        self.entries.remove(copy)
    }

    /// Returns a copy's info, if it is unassigned.
    #[must_use]
    pub fn get(&self, copy: &CopyId) -> Option<&UnassignedInfo> {
        self.entries.get(copy)
    }

    /// Returns a mutable reference to a copy's info.
    pub fn get_mut(&mut self, copy: &CopyId) -> Option<&mut UnassignedInfo> {
        self.entries.get_mut(copy)
    }

    /// Returns true if the copy has an entry.
    #[must_use]
    pub fn contains(&self, copy: &CopyId) -> bool {
        self.entries.contains_key(copy)
    }

    /// Returns the number of unassigned copies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no copy is unassigned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the number of copies still withheld by the node-left delay.
    #[must_use]
    pub fn delayed_count(&self) -> usize {
        self.entries.values().filter(|info| info.delayed).count()
    }

    /// Iterates over entries in copy order.
    pub fn iter(&self) -> impl Iterator<Item = (&CopyId, &UnassignedInfo)> {
        self.entries.iter()
    }

    /// Drops every entry belonging to `index`.
    pub fn remove_index(&mut self, index: &cairn_core::IndexName) {
        let doomed: Vec<CopyId> = self
            .entries
            .keys()
            .filter(|copy| &copy.shard_id.index == index)
            .cloned()
            .collect();
        for copy in doomed {
            self.entries.remove(&copy);
        }
    }
}

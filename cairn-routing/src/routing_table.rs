//! Routing table: every shard's set of copies.
//!
//! Backed by a persistent ordered map, so a snapshot clone is O(1) and a
//! round's edits copy only the touched paths.

use cairn_core::{IndexName, NodeId, ShardId};
use im::OrdMap;
use serde::{Deserialize, Serialize};

use crate::error::{RoutingError, RoutingResult};
use crate::shard::{CopyId, ShardRouting};

/// Mapping from shard to its copies, ordered by slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingTable {
    shards: OrdMap<ShardId, Vec<ShardRouting>>,
}

impl RoutingTable {
    /// Creates an empty routing table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the copies of a shard.
    #[must_use]
    pub fn shard(&self, shard_id: &ShardId) -> Option<&[ShardRouting]> {
        self.shards.get(shard_id).map(Vec::as_slice)
    }

    /// Returns one copy.
    #[must_use]
    pub fn get(&self, copy: &CopyId) -> Option<&ShardRouting> {
        self.shards
            .get(&copy.shard_id)
            .and_then(|copies| copies.iter().find(|routing| routing.copy_id() == copy))
    }

    /// Returns the copy holding the primary role.
    #[must_use]
    pub fn primary(&self, shard_id: &ShardId) -> Option<&ShardRouting> {
        self.shards
            .get(shard_id)
            .and_then(|copies| copies.iter().find(|routing| routing.is_primary()))
    }

    /// Returns the copy of `shard_id` occupying `node`, as host or relocation target.
    #[must_use]
    pub fn copy_on_node(&self, shard_id: &ShardId, node: NodeId) -> Option<&ShardRouting> {
        self.shards.get(shard_id).and_then(|copies| {
            copies
                .iter()
                .find(|routing| routing.occupied_nodes().any(|occupied| occupied == node))
        })
    }

    /// Returns true if the table has the shard.
    #[must_use]
    pub fn contains_shard(&self, shard_id: &ShardId) -> bool {
        self.shards.contains_key(shard_id)
    }

    /// Adds a copy, keeping the shard's copies ordered by slot.
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolation` if the slot is already taken.
    pub fn insert(&mut self, routing: ShardRouting) -> RoutingResult<()> {
        let copies = self.shards.entry(routing.shard_id().clone()).or_insert_with(Vec::new);
        match copies.binary_search_by_key(&routing.copy_id().slot, |c| c.copy_id().slot) {
            Ok(_) => Err(RoutingError::InvariantViolation {
                invariant: "unique copy slot",
                detail: format!("{} already present", routing.copy_id()),
            }),
            Err(position) => {
                copies.insert(position, routing);
                Ok(())
            }
        }
    }

    /// Replaces an existing copy and returns the previous value.
    ///
    /// # Errors
    ///
    /// Returns `CopyNotFound` if the copy is not in the table.
    pub fn replace(&mut self, routing: ShardRouting) -> RoutingResult<ShardRouting> {
        let slot = self
            .shards
            .get_mut(routing.shard_id())
            .and_then(|copies| copies.iter_mut().find(|c| c.copy_id() == routing.copy_id()))
            .ok_or_else(|| RoutingError::CopyNotFound {
                copy: routing.copy_id().clone(),
            })?;
        Ok(std::mem::replace(slot, routing))
    }

    /// Removes a copy. Removing the last copy removes the shard.
    pub fn remove(&mut self, copy: &CopyId) -> Option<ShardRouting> {
        let copies = self.shards.get_mut(&copy.shard_id)?;
        let position = copies.iter().position(|routing| routing.copy_id() == copy)?;
        let removed = copies.remove(position);
        if copies.is_empty() {
            self.shards.remove(&copy.shard_id);
        }
        Some(removed)
    }

    /// Returns the slot a new copy of `shard_id` should take.
    #[must_use]
    pub fn next_slot(&self, shard_id: &ShardId) -> u32 {
        self.shards
            .get(shard_id)
            .and_then(|copies| copies.last())
            .map_or(0, |last| last.copy_id().slot + 1)
    }

    /// Returns every shard id of an index.
    #[must_use]
    pub fn index_shards(&self, index: &IndexName) -> Vec<ShardId> {
        self.shards
            .keys()
            .filter(|shard_id| &shard_id.index == index)
            .cloned()
            .collect()
    }

    /// Iterates over shards in order.
    pub fn shards(&self) -> impl Iterator<Item = (&ShardId, &[ShardRouting])> {
        self.shards.iter().map(|(id, copies)| (id, copies.as_slice()))
    }

    /// Iterates over every copy in shard then slot order.
    pub fn iter(&self) -> impl Iterator<Item = &ShardRouting> {
        self.shards.values().flat_map(|copies| copies.iter())
    }

    /// Iterates over unassigned copies.
    pub fn unassigned(&self) -> impl Iterator<Item = &ShardRouting> {
        self.iter().filter(|routing| routing.is_unassigned())
    }

    /// Returns the number of shards.
    #[must_use]
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Returns true if the table has no shards.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }
}

//! Working state of one round.
//!
//! A `RoutingAllocation` owns a private copy of the input snapshot plus the
//! derived [`RoutingNodes`] view. All placement changes in a round go
//! through its methods, which keep the routing table, the node view, the
//! unassigned registry, the failure ledger and the diff in step. Nothing
//! is published until [`RoutingAllocation::into_parts`] hands the result
//! back to the orchestrator.

use cairn_core::{AllocationLimits, IndexName, NodeId, ShardId};
use tracing::info;

use crate::diff::{AllocationCause, RoutingChange, RoutingDiff};
use crate::error::{RoutingError, RoutingResult};
use crate::metadata::{IndexMetadata, Metadata};
use crate::nodes::{DiscoveryNode, DiscoveryNodes};
use crate::retry::{FailureLedger, RetryController};
use crate::routing_nodes::RoutingNodes;
use crate::routing_table::RoutingTable;
use crate::shard::{CopyId, ShardCopyRole, ShardRouting, ShardState};
use crate::state::ClusterState;
use crate::unassigned::{AllocationStatus, MarkUnassigned, UnassignedReason, UnassignedRegistry};

/// How a copy lost its placement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyFailure {
    /// Reason recorded in the unassigned info.
    pub reason: UnassignedReason,
    /// Failure detail, if any.
    pub detail: Option<String>,
    /// Whether the failure counts toward the retry limit.
    pub counts_as_failure: bool,
}

impl CopyFailure {
    /// The hosting node left the cluster.
    #[must_use]
    pub const fn node_left() -> Self {
        Self {
            reason: UnassignedReason::NodeLeft,
            detail: None,
            counts_as_failure: false,
        }
    }

    /// The node failed to initialize the copy.
    #[must_use]
    pub fn failed_initialization(detail: &str) -> Self {
        Self {
            reason: UnassignedReason::AllocationFailed,
            detail: Some(detail.to_string()),
            counts_as_failure: true,
        }
    }

    /// An active copy failed on its node.
    #[must_use]
    pub fn failed_active(detail: &str) -> Self {
        Self {
            reason: UnassignedReason::AllocationFailed,
            detail: Some(detail.to_string()),
            counts_as_failure: false,
        }
    }

    /// An operator cancelled the placement.
    #[must_use]
    pub const fn cancelled() -> Self {
        Self {
            reason: UnassignedReason::RerouteCancelled,
            detail: None,
            counts_as_failure: false,
        }
    }
}

/// Mutable working copy of a cluster state for one round.
#[derive(Debug)]
pub struct RoutingAllocation {
    state: ClusterState,
    routing_nodes: RoutingNodes,
    limits: AllocationLimits,
    now_us: u64,
    diff: RoutingDiff,
}

impl RoutingAllocation {
    /// Starts a round from a snapshot.
    #[must_use]
    pub fn new(state: ClusterState, limits: AllocationLimits, now_us: u64) -> Self {
        let routing_nodes = RoutingNodes::build(&state.routing_table);
        Self {
            state,
            routing_nodes,
            limits,
            now_us,
            diff: RoutingDiff::new(),
        }
    }

    /// Returns the working state.
    #[must_use]
    pub const fn state(&self) -> &ClusterState {
        &self.state
    }

    /// Returns live nodes.
    #[must_use]
    pub const fn nodes(&self) -> &DiscoveryNodes {
        &self.state.nodes
    }

    /// Returns metadata.
    #[must_use]
    pub const fn metadata(&self) -> &Metadata {
        &self.state.metadata
    }

    /// Returns the routing table.
    #[must_use]
    pub const fn routing_table(&self) -> &RoutingTable {
        &self.state.routing_table
    }

    /// Returns the node view.
    #[must_use]
    pub const fn routing_nodes(&self) -> &RoutingNodes {
        &self.routing_nodes
    }

    /// Returns the unassigned registry.
    #[must_use]
    pub const fn unassigned(&self) -> &UnassignedRegistry {
        &self.state.unassigned
    }

    /// Returns the failure ledger.
    #[must_use]
    pub const fn failures(&self) -> &FailureLedger {
        &self.state.failures
    }

    /// Returns the allocation limits.
    #[must_use]
    pub const fn limits(&self) -> &AllocationLimits {
        &self.limits
    }

    /// Returns the round's clock reading.
    #[must_use]
    pub const fn now_us(&self) -> u64 {
        self.now_us
    }

    /// Returns the changes made so far.
    #[must_use]
    pub const fn diff(&self) -> &RoutingDiff {
        &self.diff
    }

    /// Returns a copy's current routing.
    ///
    /// # Errors
    ///
    /// Returns `CopyNotFound` if the copy is not in the table.
    pub fn routing(&self, copy: &CopyId) -> RoutingResult<ShardRouting> {
        self.state
            .routing_table
            .get(copy)
            .cloned()
            .ok_or_else(|| RoutingError::CopyNotFound { copy: copy.clone() })
    }

    /// Returns true if the shard's primary is started or relocating.
    #[must_use]
    pub fn has_active_primary(&self, shard_id: &ShardId) -> bool {
        self.state
            .routing_table
            .primary(shard_id)
            .is_some_and(ShardRouting::is_active)
    }

    /// Ends the round and returns the new state and its diff.
    #[must_use]
    pub fn into_parts(self) -> (ClusterState, RoutingDiff) {
        (self.state, self.diff)
    }

    // ---------------------------------------------------------------------
    // Membership
    // ---------------------------------------------------------------------

    /// Adds or replaces a live node.
    pub fn add_node(&mut self, node: DiscoveryNode) {
        self.state.nodes.add(node);
    }

    /// Removes a node from membership. Its copies are handled by the round.
    pub fn remove_node(&mut self, node: NodeId) -> Option<DiscoveryNode> {
        self.state.nodes.remove(node)
    }

    // ---------------------------------------------------------------------
    // Placement transitions
    // ---------------------------------------------------------------------

    /// Assigns an unassigned copy to `node`.
    ///
    /// # Errors
    ///
    /// Returns an error if the copy is missing or not unassigned.
    pub fn initialize(&mut self, copy: &CopyId, node: NodeId, cause: AllocationCause) -> RoutingResult<()> {
        let routing = self.routing(copy)?.initialize(node)?;
        self.put(routing)?;
        self.state.unassigned.clear(copy);
        self.diff.push(RoutingChange::Initialized {
            copy: copy.clone(),
            node,
            cause,
        });
        Ok(())
    }

    /// Marks recovery of a copy complete.
    ///
    /// Resets the copy's failure counter and records the shard's data on
    /// the hosting node.
    ///
    /// # Errors
    ///
    /// Returns an error if the copy is neither initializing nor relocating.
    pub fn start(&mut self, copy: &CopyId) -> RoutingResult<()> {
        let before = self.routing(copy)?;
        let started = before.clone().start()?;
        let Some(node) = started.current_node() else {
            return Err(RoutingError::InvariantViolation {
                invariant: "started copy has a node",
                detail: format!("{copy} started without a node"),
            });
        };
        let primary = started.is_primary();
        self.put(started)?;

        match (before.state(), before.current_node()) {
            (ShardState::Relocating, Some(from)) => self.diff.push(RoutingChange::Relocated {
                copy: copy.clone(),
                from,
                to: node,
            }),
            _ => self.diff.push(RoutingChange::Started {
                copy: copy.clone(),
                node,
            }),
        }

        RetryController::reset(&mut self.state.failures, copy);
        if let Some(host) = self.state.nodes.get_mut(node) {
            host.stored_shards.insert(copy.shard_id.clone());
        }
        if primary {
            self.state.metadata.mark_activated(&copy.shard_id);
        }
        Ok(())
    }

    /// Begins moving a started copy to `target`.
    ///
    /// # Errors
    ///
    /// Returns an error if the copy is not started.
    pub fn relocate(&mut self, copy: &CopyId, target: NodeId) -> RoutingResult<()> {
        let routing = self.routing(copy)?;
        let from = routing.current_node();
        self.put(routing.relocate(target)?)?;
        if let Some(from) = from {
            self.diff.push(RoutingChange::RelocationStarted {
                copy: copy.clone(),
                from,
                to: target,
            });
        }
        Ok(())
    }

    /// Abandons a move, leaving the copy started on its source.
    ///
    /// # Errors
    ///
    /// Returns an error if the copy is not relocating.
    pub fn cancel_relocation(&mut self, copy: &CopyId) -> RoutingResult<()> {
        let routing = self.routing(copy)?;
        let (from, to) = (routing.current_node(), routing.relocating_node());
        self.put(routing.cancel_relocation()?)?;
        if let (Some(from), Some(to)) = (from, to) {
            self.diff.push(RoutingChange::RelocationCancelled {
                copy: copy.clone(),
                from,
                to,
            });
        }
        Ok(())
    }

    /// Removes a copy from its node.
    ///
    /// When the copy is the primary, replicas still recovering from it are
    /// reset with `PRIMARY_FAILED` and the first active replica by node id
    /// takes over the primary role. The lost copy continues as an
    /// unassigned replica in that case.
    ///
    /// # Errors
    ///
    /// Returns an error if the copy is missing or a transition is invalid.
    pub fn fail_copy(&mut self, copy: &CopyId, failure: CopyFailure) -> RoutingResult<()> {
        let routing = self.routing(copy)?;
        if routing.is_unassigned() {
            return Ok(());
        }
        if !routing.is_primary() {
            return self.unassign(copy, &failure);
        }

        let siblings: Vec<ShardRouting> = self
            .state
            .routing_table
            .shard(routing.shard_id())
            .unwrap_or(&[])
            .iter()
            .filter(|sibling| !sibling.is_primary())
            .cloned()
            .collect();

        let primary_failed = CopyFailure {
            reason: UnassignedReason::PrimaryFailed,
            detail: Some(format!("primary {copy} failed")),
            counts_as_failure: false,
        };
        for replica in siblings.iter().filter(|s| s.state() == ShardState::Initializing) {
            self.unassign(replica.copy_id(), &primary_failed)?;
        }

        let successor = siblings
            .iter()
            .filter(|sibling| sibling.is_active())
            .min_by_key(|sibling| sibling.current_node())
            .cloned();

        match successor {
            Some(successor) => {
                self.put(routing.demote())?;
                self.unassign(copy, &failure)?;
                let node = successor.current_node();
                let promoted = successor.promote()?;
                let promoted_id = promoted.copy_id().clone();
                self.put(promoted)?;
                if let Some(node) = node {
                    info!(copy = %promoted_id, node = %node, "promoted replica to primary");
                    self.diff.push(RoutingChange::Promoted {
                        copy: promoted_id,
                        node,
                    });
                }
                Ok(())
            }
            None => self.unassign(copy, &failure),
        }
    }

    /// Records the outcome of a placement attempt for an unassigned copy.
    pub fn set_status(&mut self, copy: &CopyId, status: AllocationStatus) {
        if let Some(info) = self.state.unassigned.get_mut(copy) {
            info.status = status;
        }
    }

    /// Clears the delayed flag of an unassigned copy.
    pub fn clear_delay(&mut self, copy: &CopyId) {
        if let Some(info) = self.state.unassigned.get_mut(copy) {
            info.delayed = false;
        }
    }

    /// Refreshes delay flags against the round's clock. Returns the number
    /// of copies still delayed.
    pub fn refresh_delays(&mut self) -> usize {
        crate::delay::DelayScheduler::refresh(&mut self.state.unassigned, &self.state.metadata, self.now_us)
    }

    /// Clears one copy's failure counter.
    pub fn reset_failures(&mut self, copy: &CopyId) {
        RetryController::reset(&mut self.state.failures, copy);
        if let Some(info) = self.state.unassigned.get_mut(copy) {
            info.failed_allocations = 0;
        }
    }

    /// Clears every failure counter. Returns the number of copies reset.
    pub fn reset_all_failures(&mut self) -> usize {
        let copies = RetryController::reset_all(&mut self.state.failures);
        for copy in &copies {
            if let Some(info) = self.state.unassigned.get_mut(copy) {
                info.failed_allocations = 0;
            }
        }
        copies.len()
    }

    // ---------------------------------------------------------------------
    // Index layout
    // ---------------------------------------------------------------------

    /// Registers an index and creates all of its copies unassigned.
    ///
    /// # Errors
    ///
    /// Returns `IndexAlreadyExists` if the name is taken.
    pub fn add_index(&mut self, index: IndexMetadata) -> RoutingResult<()> {
        if self.state.metadata.index(&index.name).is_some() {
            return Err(RoutingError::IndexAlreadyExists { index: index.name });
        }
        let name = index.name.clone();
        let (shards, replicas) = (index.settings.number_of_shards, index.settings.number_of_replicas);
        self.state.metadata.put_index(index);

        for shard in 0..shards {
            let shard_id = ShardId::new(name.clone(), shard);
            for slot in 0..=replicas {
                let role = if slot == 0 {
                    ShardCopyRole::Primary
                } else {
                    ShardCopyRole::Replica
                };
                self.add_copy(CopyId::new(shard_id.clone(), slot), role, UnassignedReason::IndexCreated)?;
            }
        }
        Ok(())
    }

    /// Deletes an index with all of its copies and stored data.
    ///
    /// # Errors
    ///
    /// Returns `UnknownIndex` if the index does not exist.
    pub fn remove_index(&mut self, name: &IndexName) -> RoutingResult<()> {
        if self.state.metadata.remove_index(name).is_none() {
            return Err(RoutingError::UnknownIndex { index: name.clone() });
        }
        for shard_id in self.state.routing_table.index_shards(name) {
            let copies: Vec<CopyId> = self
                .state
                .routing_table
                .shard(&shard_id)
                .unwrap_or(&[])
                .iter()
                .map(|routing| routing.copy_id().clone())
                .collect();
            for copy in copies {
                self.remove_copy(&copy)?;
            }
        }
        for id in self.state.nodes.ids() {
            if let Some(node) = self.state.nodes.get_mut(id) {
                node.stored_shards.retain(|shard_id| &shard_id.index != name);
            }
        }
        Ok(())
    }

    /// Replaces an index's metadata without touching its copies.
    pub fn put_index_metadata(&mut self, index: IndexMetadata) {
        self.state.metadata.put_index(index);
    }

    /// Replaces the cluster-wide settings.
    pub fn put_cluster_settings(&mut self, settings: crate::metadata::ClusterSettings) {
        self.state.metadata.set_cluster(settings);
    }

    /// Adds a new unassigned copy.
    ///
    /// # Errors
    ///
    /// Returns an error if the slot is already taken.
    pub fn add_copy(&mut self, copy: CopyId, role: ShardCopyRole, reason: UnassignedReason) -> RoutingResult<()> {
        self.state
            .routing_table
            .insert(ShardRouting::unassigned(copy.clone(), role))?;
        self.state.unassigned.mark_unassigned(
            &copy,
            MarkUnassigned {
                reason,
                last_node: None,
                failed_allocations: 0,
                last_failure: None,
                delay_enabled: false,
                now_us: self.now_us,
            },
        );
        self.diff.push(RoutingChange::Added { copy });
        Ok(())
    }

    /// Deletes a copy.
    ///
    /// # Errors
    ///
    /// Returns `CopyNotFound` if the copy is not in the table.
    pub fn remove_copy(&mut self, copy: &CopyId) -> RoutingResult<()> {
        let removed = self
            .state
            .routing_table
            .remove(copy)
            .ok_or_else(|| RoutingError::CopyNotFound { copy: copy.clone() })?;
        self.routing_nodes.remove(&removed);
        self.state.unassigned.clear(copy);
        RetryController::reset(&mut self.state.failures, copy);
        self.diff.push(RoutingChange::Removed {
            copy: copy.clone(),
            node: removed.current_node(),
        });
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------------

    fn put(&mut self, routing: ShardRouting) -> RoutingResult<()> {
        let previous = self.state.routing_table.replace(routing.clone())?;
        self.routing_nodes.update(&previous, &routing);
        Ok(())
    }

    fn unassign(&mut self, copy: &CopyId, failure: &CopyFailure) -> RoutingResult<()> {
        let routing = self.routing(copy)?;
        let last_node = routing.current_node();
        let is_replica = !routing.is_primary();
        self.put(routing.unassign()?)?;

        let failed_allocations = if failure.counts_as_failure {
            RetryController::record_failure(
                &mut self.state.failures,
                copy,
                failure.detail.as_deref().unwrap_or_default(),
            )
        } else {
            self.state.failures.count(copy)
        };
        // A lost primary with no successor can only return to its data,
        // so only replicas wait out the node-left delay.
        let delay_enabled = is_replica
            && self
                .state
                .metadata
                .settings_for(&copy.shard_id)
                .is_some_and(|settings| settings.node_left_delay_us > 0);

        self.state.unassigned.mark_unassigned(
            copy,
            MarkUnassigned {
                reason: failure.reason,
                last_node,
                failed_allocations,
                last_failure: failure.detail.clone(),
                delay_enabled,
                now_us: self.now_us,
            },
        );
        self.diff.push(RoutingChange::Unassigned {
            copy: copy.clone(),
            node: last_node,
            reason: failure.reason,
        });
        Ok(())
    }
}

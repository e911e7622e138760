//! Reroute orchestrator.
//!
//! Every state-changing event becomes one round:
//!
//! 1. apply the event (membership change, shard started or failed, index change)
//! 2. take copies off departed nodes
//! 3. reset failure counters if the request says `retry_failed`
//! 4. expire node-left delays
//! 5. apply operator commands
//! 6. allocate eligible unassigned copies, primaries first
//! 7. bump the version and verify invariants
//!
//! A round works on a private copy of the snapshot. If any step fails the
//! caller keeps the previous snapshot; nothing partial is ever published.

use cairn_core::{AllocationLimits, IndexName, NodeId, ShardId};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::allocation::{CopyFailure, RoutingAllocation};
use crate::command::{AllocationCommand, CommandExecutor, CommandResult};
use crate::decider::{AllocationDeciders, Decision};
use crate::delay::DelayScheduler;
use crate::diff::{AllocationCause, RoutingDiff};
use crate::error::{RoutingError, RoutingResult};
use crate::invariants;
use crate::metadata::{ClusterSettings, IndexMetadata, IndexSettings};
use crate::nodes::DiscoveryNode;
use crate::retry::RetryController;
use crate::shard::{CopyId, ShardCopyRole, ShardRouting, ShardState};
use crate::state::ClusterState;
use crate::unassigned::{AllocationStatus, UnassignedReason};

/// An explicit reroute request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RerouteRequest {
    /// Commands applied in order before automatic allocation.
    pub commands: Vec<AllocationCommand>,
    /// Reset every failure counter for this round.
    pub retry_failed: bool,
}

impl RerouteRequest {
    /// A request with no commands.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the retry-failed flag.
    #[must_use]
    pub const fn with_retry_failed(mut self, retry_failed: bool) -> Self {
        self.retry_failed = retry_failed;
        self
    }

    /// Appends a command.
    #[must_use]
    pub fn with_command(mut self, command: AllocationCommand) -> Self {
        self.commands.push(command);
        self
    }
}

/// Result of a round.
#[derive(Debug, Clone)]
pub struct RerouteOutcome {
    /// The new snapshot.
    pub state: ClusterState,
    /// Per-command results, in request order.
    pub command_results: Vec<CommandResult>,
    /// Placement changes made by the round.
    pub diff: RoutingDiff,
}

/// The reroute orchestrator.
#[derive(Debug)]
pub struct AllocationService {
    deciders: AllocationDeciders,
    limits: AllocationLimits,
}

impl AllocationService {
    /// Creates a service with the default deciders.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSettings` if the limits do not validate.
    pub fn new(limits: AllocationLimits) -> RoutingResult<Self> {
        Self::with_deciders(AllocationDeciders::with_defaults(&limits), limits)
    }

    /// Creates a service with a custom decider set.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSettings` if the limits do not validate.
    pub fn with_deciders(deciders: AllocationDeciders, limits: AllocationLimits) -> RoutingResult<Self> {
        limits.validate()?;
        Ok(Self { deciders, limits })
    }

    /// Returns the decider set.
    #[must_use]
    pub const fn deciders(&self) -> &AllocationDeciders {
        &self.deciders
    }

    /// Returns the limits.
    #[must_use]
    pub const fn limits(&self) -> &AllocationLimits {
        &self.limits
    }

    /// Runs a round for an explicit reroute request.
    ///
    /// # Errors
    ///
    /// Returns `UnknownIndex` or `UnknownShard` if a command names a shard
    /// that does not exist; other command problems are reported per command.
    pub fn reroute(
        &self,
        state: &ClusterState,
        request: &RerouteRequest,
        now_us: u64,
    ) -> RoutingResult<RerouteOutcome> {
        CommandExecutor::validate_targets(state.metadata(), &request.commands)?;
        self.round(state, now_us, &request.commands, request.retry_failed, |_| Ok(()))
    }

    /// A node joined, or rejoined with its data location.
    ///
    /// # Errors
    ///
    /// Returns an error only if the round breaks an invariant.
    pub fn node_joined(&self, state: &ClusterState, node: DiscoveryNode, now_us: u64) -> RoutingResult<RerouteOutcome> {
        info!(node = %node.id, stored = node.stored_shards.len(), "node joined");
        self.round(state, now_us, &[], false, |allocation| {
            allocation.add_node(node);
            Ok(())
        })
    }

    /// A node left the cluster.
    ///
    /// # Errors
    ///
    /// Returns an error only if the round breaks an invariant.
    pub fn node_left(&self, state: &ClusterState, node: NodeId, now_us: u64) -> RoutingResult<RerouteOutcome> {
        info!(node = %node, "node left");
        self.round(state, now_us, &[], false, |allocation| {
            allocation.remove_node(node);
            Ok(())
        })
    }

    /// A copy finished recovering on `node`.
    ///
    /// Stale reports (no copy of the shard is recovering on the node) are
    /// ignored.
    ///
    /// # Errors
    ///
    /// Returns an error only if the round breaks an invariant.
    pub fn apply_started_shard(
        &self,
        state: &ClusterState,
        shard_id: &ShardId,
        node: NodeId,
        now_us: u64,
    ) -> RoutingResult<RerouteOutcome> {
        self.round(state, now_us, &[], false, |allocation| {
            match recovering_on(allocation, shard_id, node) {
                Some(copy) => allocation.start(&copy),
                None => {
                    debug!(shard = %shard_id, node = %node, "ignoring stale started report");
                    Ok(())
                }
            }
        })
    }

    /// A copy failed on `node`.
    ///
    /// An initializing copy becomes unassigned and its failure counter
    /// grows. A failed relocation target cancels the move. A failed active
    /// copy becomes unassigned; for a primary an active replica takes over.
    ///
    /// # Errors
    ///
    /// Returns an error only if the round breaks an invariant.
    pub fn apply_failed_shard(
        &self,
        state: &ClusterState,
        shard_id: &ShardId,
        node: NodeId,
        detail: &str,
        now_us: u64,
    ) -> RoutingResult<RerouteOutcome> {
        self.round(state, now_us, &[], false, |allocation| {
            let Some(routing) = allocation.routing_table().copy_on_node(shard_id, node).cloned() else {
                debug!(shard = %shard_id, node = %node, "ignoring stale failure report");
                return Ok(());
            };
            let copy = routing.copy_id().clone();
            if routing.relocating_node() == Some(node) {
                warn!(copy = %copy, node = %node, detail, "relocation target failed");
                return allocation.cancel_relocation(&copy);
            }
            let failure = if routing.state() == ShardState::Initializing {
                CopyFailure::failed_initialization(detail)
            } else {
                CopyFailure::failed_active(detail)
            };
            warn!(copy = %copy, node = %node, detail, "shard failed");
            allocation.fail_copy(&copy, failure)
        })
    }

    /// Creates an index and allocates its copies.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSettings` or `IndexAlreadyExists`.
    pub fn create_index(
        &self,
        state: &ClusterState,
        name: &str,
        settings: IndexSettings,
        now_us: u64,
    ) -> RoutingResult<RerouteOutcome> {
        settings.validate()?;
        info!(index = name, shards = settings.number_of_shards, replicas = settings.number_of_replicas, "creating index");
        self.round(state, now_us, &[], false, |allocation| {
            allocation.add_index(IndexMetadata::new(name, settings))
        })
    }

    /// Deletes an index.
    ///
    /// # Errors
    ///
    /// Returns `UnknownIndex` if it does not exist.
    pub fn delete_index(&self, state: &ClusterState, name: &IndexName, now_us: u64) -> RoutingResult<RerouteOutcome> {
        info!(index = %name, "deleting index");
        self.round(state, now_us, &[], false, |allocation| allocation.remove_index(name))
    }

    /// Changes an index's replica count.
    ///
    /// # Errors
    ///
    /// Returns `UnknownIndex` or `InvalidSettings`.
    pub fn update_number_of_replicas(
        &self,
        state: &ClusterState,
        name: &IndexName,
        number_of_replicas: u32,
        now_us: u64,
    ) -> RoutingResult<RerouteOutcome> {
        let index = state
            .metadata()
            .index(name)
            .ok_or_else(|| RoutingError::UnknownIndex { index: name.clone() })?;
        let settings = IndexSettings {
            number_of_replicas,
            ..index.settings.clone()
        };
        self.update_index_settings(state, name, settings, now_us)
    }

    /// Replaces an index's settings. The shard count is fixed at creation.
    ///
    /// # Errors
    ///
    /// Returns `UnknownIndex` or `InvalidSettings`.
    pub fn update_index_settings(
        &self,
        state: &ClusterState,
        name: &IndexName,
        settings: IndexSettings,
        now_us: u64,
    ) -> RoutingResult<RerouteOutcome> {
        settings.validate()?;
        let current = state
            .metadata()
            .index(name)
            .ok_or_else(|| RoutingError::UnknownIndex { index: name.clone() })?;
        if current.settings.number_of_shards != settings.number_of_shards {
            return Err(RoutingError::InvalidSettings(cairn_core::Error::InvalidArgument {
                name: "number_of_shards",
                reason: "cannot change on an existing index",
            }));
        }
        let updated = IndexMetadata {
            settings,
            ..current.clone()
        };
        self.round(state, now_us, &[], false, |allocation| {
            let replicas = updated.settings.number_of_replicas;
            allocation.put_index_metadata(updated);
            resize_replicas(allocation, name, replicas)
        })
    }

    /// Replaces cluster-wide settings.
    ///
    /// # Errors
    ///
    /// Returns an error only if the round breaks an invariant.
    pub fn update_cluster_settings(
        &self,
        state: &ClusterState,
        settings: ClusterSettings,
        now_us: u64,
    ) -> RoutingResult<RerouteOutcome> {
        info!(enable = ?settings.allocation_enable, awareness = ?settings.awareness_attributes, "updating cluster settings");
        self.round(state, now_us, &[], false, |allocation| {
            allocation.put_cluster_settings(settings);
            Ok(())
        })
    }

    // ---------------------------------------------------------------------
    // Round
    // ---------------------------------------------------------------------

    fn round<F>(
        &self,
        state: &ClusterState,
        now_us: u64,
        commands: &[AllocationCommand],
        retry_failed: bool,
        event: F,
    ) -> RoutingResult<RerouteOutcome>
    where
        F: FnOnce(&mut RoutingAllocation) -> RoutingResult<()>,
    {
        let mut allocation = RoutingAllocation::new(state.clone(), self.limits, now_us);

        event(&mut allocation)?;
        disassociate_dead_nodes(&mut allocation)?;
        if retry_failed {
            let reset = allocation.reset_all_failures();
            info!(reset, "retrying failed allocations");
        }
        allocation.refresh_delays();

        let command_results = CommandExecutor::new(&self.deciders).execute(&mut allocation, commands)?;
        self.allocate_unassigned(&mut allocation)?;

        let (mut next, diff) = allocation.into_parts();
        next.version = state.version() + 1;
        if let Err(err) = invariants::check(&next) {
            error!(version = next.version, error = %err, "round aborted, keeping previous snapshot");
            return Err(err);
        }

        debug!(
            version = next.version,
            placed = diff.added().len(),
            unassigned = next.unassigned().len(),
            delayed = next.delayed_unassigned_count(),
            "round complete"
        );
        Ok(RerouteOutcome {
            state: next,
            command_results,
            diff,
        })
    }

    fn allocate_unassigned(&self, allocation: &mut RoutingAllocation) -> RoutingResult<()> {
        let mut pending: Vec<ShardRouting> = allocation.routing_table().unassigned().cloned().collect();
        pending.sort_by(|a, b| {
            (!a.is_primary(), a.copy_id()).cmp(&(!b.is_primary(), b.copy_id()))
        });

        for routing in pending {
            let status = self.allocate_one(allocation, &routing)?;
            if let Some(status) = status {
                allocation.set_status(routing.copy_id(), status);
            }
        }
        Ok(())
    }

    /// Tries to place one unassigned copy. Returns the status to record
    /// when the copy stays unassigned.
    fn allocate_one(
        &self,
        allocation: &mut RoutingAllocation,
        routing: &ShardRouting,
    ) -> RoutingResult<Option<AllocationStatus>> {
        let copy = routing.copy_id();
        let Some(info) = allocation.unassigned().get(copy).cloned() else {
            return Ok(None);
        };
        let Some(settings) = allocation.metadata().settings_for(&copy.shard_id).cloned() else {
            return Ok(None);
        };

        // A departed node that came back with the copy's data gets it back.
        if info.reason == UnassignedReason::NodeLeft && info.delayed {
            if let Some(last) = info.last_allocated_node {
                if let Some(node) = allocation.nodes().get(last).filter(|n| n.has_shard_data(&copy.shard_id)) {
                    match self.deciders.can_allocate(routing, node, allocation) {
                        Decision::Yes => {
                            info!(copy = %copy, node = %last, "reattaching copy to returning node");
                            allocation.initialize(copy, last, AllocationCause::Reattached)?;
                            return Ok(None);
                        }
                        Decision::Throttle { .. } => return Ok(Some(AllocationStatus::DecidersThrottled)),
                        Decision::No { .. } => {}
                    }
                }
            }
        }

        if !DelayScheduler::is_eligible_now(&info, settings.node_left_delay_us, allocation.now_us()) {
            return Ok(Some(AllocationStatus::Delayed));
        }
        if RetryController::for_index(&settings).is_blocked(allocation.failures(), copy) {
            if info.status != AllocationStatus::RetriesExhausted {
                warn!(
                    copy = %copy,
                    failures = allocation.failures().count(copy),
                    "copy exceeded max retries, waiting for retry_failed"
                );
            }
            return Ok(Some(AllocationStatus::RetriesExhausted));
        }

        let needs_data = routing.role() == ShardCopyRole::Primary && allocation.metadata().is_activated(&copy.shard_id);
        let candidates: Vec<NodeId> = allocation
            .nodes()
            .iter()
            .filter(|node| !needs_data || node.has_shard_data(&copy.shard_id))
            .map(|node| node.id)
            .collect();
        if candidates.is_empty() && needs_data {
            return Ok(Some(AllocationStatus::NoValidShardCopy));
        }

        let mut throttled = false;
        for candidate in candidates {
            let Some(node) = allocation.nodes().get(candidate) else {
                continue;
            };
            match self.deciders.can_allocate(routing, node, allocation) {
                Decision::Yes => {
                    allocation.initialize(copy, candidate, AllocationCause::Automatic)?;
                    return Ok(None);
                }
                Decision::Throttle { .. } => throttled = true,
                Decision::No { .. } => {}
            }
        }

        Ok(Some(if throttled {
            AllocationStatus::DecidersThrottled
        } else {
            AllocationStatus::DecidersNo
        }))
    }
}

/// Copy of `shard_id` recovering on `node`: initializing there or moving there.
fn recovering_on(allocation: &RoutingAllocation, shard_id: &ShardId, node: NodeId) -> Option<CopyId> {
    allocation
        .routing_table()
        .copy_on_node(shard_id, node)
        .filter(|routing| {
            routing.relocating_node() == Some(node)
                || (routing.state() == ShardState::Initializing && routing.current_node() == Some(node))
        })
        .map(|routing| routing.copy_id().clone())
}

/// Takes every copy off nodes that are no longer members.
fn disassociate_dead_nodes(allocation: &mut RoutingAllocation) -> RoutingResult<()> {
    let dead: Vec<NodeId> = allocation
        .routing_nodes()
        .occupied_nodes()
        .filter(|node| !allocation.nodes().contains(*node))
        .collect();

    for node in dead {
        let copies: Vec<CopyId> = allocation
            .routing_nodes()
            .entries(node)
            .iter()
            .map(|entry| entry.copy.clone())
            .collect();
        info!(node = %node, copies = copies.len(), "removing copies of departed node");

        for copy in copies {
            // Earlier failures in this loop may already have moved the copy.
            let routing = allocation.routing(&copy)?;
            if routing.relocating_node() == Some(node) {
                allocation.cancel_relocation(&copy)?;
            } else if routing.current_node() == Some(node) {
                allocation.fail_copy(&copy, CopyFailure::node_left())?;
            }
        }
    }
    Ok(())
}

/// Adds or removes replica copies until every shard of `index` has
/// `1 + replicas` copies. Removal takes unassigned copies first, then
/// initializing ones, then started ones, highest slot first.
fn resize_replicas(allocation: &mut RoutingAllocation, index: &IndexName, replicas: u32) -> RoutingResult<()> {
    let wanted = replicas as usize + 1;
    for shard_id in allocation.routing_table().index_shards(index) {
        let copies = allocation.routing_table().shard(&shard_id).unwrap_or(&[]).to_vec();

        if copies.len() < wanted {
            for _ in copies.len()..wanted {
                let slot = allocation.routing_table().next_slot(&shard_id);
                allocation.add_copy(
                    CopyId::new(shard_id.clone(), slot),
                    ShardCopyRole::Replica,
                    UnassignedReason::ReplicaAdded,
                )?;
            }
            continue;
        }

        let mut surplus: Vec<&ShardRouting> = copies.iter().filter(|copy| !copy.is_primary()).collect();
        surplus.sort_by_key(|copy| {
            let rank = match copy.state() {
                ShardState::Unassigned => 0,
                ShardState::Initializing => 1,
                ShardState::Started | ShardState::Relocating => 2,
            };
            (rank, std::cmp::Reverse(copy.copy_id().slot))
        });
        for copy in surplus.into_iter().take(copies.len() - wanted) {
            allocation.remove_copy(copy.copy_id())?;
        }
    }
    Ok(())
}

//! A simulated cluster driving the allocation engine.
//!
//! Nodes keep a data location that survives a stop, so a restarted node
//! rejoins under the same id with whatever shard data it held. Recovery
//! is instantaneous: `start_recoveries` reports every recovering copy as
//! started. Every published snapshot goes through the [`PropertyChecker`].

use std::collections::{BTreeMap, BTreeSet};

use cairn_core::{AllocationLimits, IndexName, NodeId, ShardId};
use cairn_routing::{
    AllocationService, ClusterHealth, ClusterSettings, ClusterState, DiscoveryNode, IndexSettings, RerouteOutcome,
    RerouteRequest, RoutingResult, ShardState,
};
use tracing::debug;

use crate::properties::PropertyChecker;

/// Upper bound on start rounds in `ensure_green`.
const MAX_RECOVERY_WAVES: usize = 64;

/// A simulated cluster.
#[derive(Debug)]
pub struct SimulatedCluster {
    service: AllocationService,
    state: ClusterState,
    now_us: u64,
    /// Shard data each stopped node left on disk.
    data_locations: BTreeMap<NodeId, BTreeSet<ShardId>>,
    /// Nodes currently stopped.
    stopped: BTreeSet<NodeId>,
    checker: PropertyChecker,
}

impl SimulatedCluster {
    /// Creates a cluster of `nodes` nodes with ids `1..=nodes`.
    ///
    /// # Panics
    ///
    /// Panics if a join round fails.
    #[must_use]
    pub fn new(nodes: u64) -> Self {
        Self::with_limits(nodes, AllocationLimits::new())
    }

    /// Creates a cluster with custom limits.
    ///
    /// # Panics
    ///
    /// Panics if the limits are invalid or a join round fails.
    #[must_use]
    pub fn with_limits(nodes: u64, limits: AllocationLimits) -> Self {
        let service = AllocationService::new(limits).expect("valid limits");
        let mut cluster = Self {
            service,
            state: ClusterState::new(ClusterSettings::default()),
            now_us: 0,
            data_locations: BTreeMap::new(),
            stopped: BTreeSet::new(),
            checker: PropertyChecker::new(),
        };
        for id in 1..=nodes {
            cluster.add_node(DiscoveryNode::new(NodeId::new(id)));
        }
        cluster
    }

    /// Returns the current snapshot.
    #[must_use]
    pub const fn state(&self) -> &ClusterState {
        &self.state
    }

    /// Returns the current simulated time.
    #[must_use]
    pub const fn now_us(&self) -> u64 {
        self.now_us
    }

    /// Returns the property checker.
    #[must_use]
    pub const fn checker(&self) -> &PropertyChecker {
        &self.checker
    }

    /// Returns the health of the current snapshot.
    #[must_use]
    pub fn health(&self) -> ClusterHealth {
        ClusterHealth::from_state(&self.state)
    }

    /// Returns true if the node is stopped.
    #[must_use]
    pub fn is_stopped(&self, node: NodeId) -> bool {
        self.stopped.contains(&node)
    }

    /// Advances simulated time. Nothing happens until the next round.
    pub fn advance(&mut self, delta_us: u64) {
        self.now_us += delta_us;
    }

    /// Adds a brand-new node.
    ///
    /// # Panics
    ///
    /// Panics if the round fails.
    pub fn add_node(&mut self, node: DiscoveryNode) {
        let result = self.service.node_joined(&self.state, node, self.now_us);
        self.commit(result).expect("join round");
    }

    /// Stops a node. Its data location survives for a later restart.
    ///
    /// # Panics
    ///
    /// Panics if the round fails.
    pub fn stop_node(&mut self, node: NodeId) {
        let data = self
            .state
            .node(node)
            .map(|n| n.stored_shards.clone())
            .unwrap_or_default();
        debug!(node = %node, shards = data.len(), "stopping node");
        self.data_locations.insert(node, data);
        self.stopped.insert(node);

        let result = self.service.node_left(&self.state, node, self.now_us);
        self.commit(result).expect("node-left round");
    }

    /// Restarts a stopped node on its previous data location.
    ///
    /// # Panics
    ///
    /// Panics if the round fails.
    pub fn restart_node(&mut self, node: NodeId) {
        let data = self.data_locations.remove(&node).unwrap_or_default();
        self.stopped.remove(&node);
        debug!(node = %node, shards = data.len(), "restarting node");

        let result = self
            .service
            .node_joined(&self.state, DiscoveryNode::new(node).with_stored_shards(data), self.now_us);
        self.commit(result).expect("rejoin round");
    }

    /// Creates an index.
    ///
    /// # Errors
    ///
    /// Returns the routing error if the index cannot be created.
    pub fn create_index(&mut self, name: &str, settings: IndexSettings) -> RoutingResult<RerouteOutcome> {
        let result = self.service.create_index(&self.state, name, settings, self.now_us);
        self.commit(result)
    }

    /// Deletes an index.
    ///
    /// # Errors
    ///
    /// Returns `UnknownIndex` if it does not exist.
    pub fn delete_index(&mut self, name: &str) -> RoutingResult<RerouteOutcome> {
        let result = self.service.delete_index(&self.state, &IndexName::new(name), self.now_us);
        self.commit(result)
    }

    /// Changes an index's replica count.
    ///
    /// # Errors
    ///
    /// Returns the routing error if the update is rejected.
    pub fn set_replicas(&mut self, name: &str, replicas: u32) -> RoutingResult<RerouteOutcome> {
        let result = self
            .service
            .update_number_of_replicas(&self.state, &IndexName::new(name), replicas, self.now_us);
        self.commit(result)
    }

    /// Replaces cluster-wide settings.
    ///
    /// # Panics
    ///
    /// Panics if the round fails.
    pub fn set_cluster_settings(&mut self, settings: ClusterSettings) {
        let result = self.service.update_cluster_settings(&self.state, settings, self.now_us);
        self.commit(result).expect("cluster settings round");
    }

    /// Runs an explicit reroute.
    ///
    /// # Errors
    ///
    /// Returns the top-level error for unknown shards.
    pub fn reroute(&mut self, request: &RerouteRequest) -> RoutingResult<RerouteOutcome> {
        let result = self.service.reroute(&self.state, request, self.now_us);
        self.commit(result)
    }

    /// Runs a reroute round without publishing it.
    ///
    /// # Errors
    ///
    /// Returns the round's error.
    pub fn dry_run(&self, request: &RerouteRequest) -> RoutingResult<RerouteOutcome> {
        self.service.reroute(&self.state, request, self.now_us)
    }

    /// Reports a copy failure on `node`.
    ///
    /// # Panics
    ///
    /// Panics if the round fails.
    pub fn fail_shard(&mut self, shard_id: &ShardId, node: NodeId, detail: &str) {
        let result = self
            .service
            .apply_failed_shard(&self.state, shard_id, node, detail, self.now_us);
        self.commit(result).expect("failed-shard round");
    }

    /// Reports one copy started on `node`.
    ///
    /// # Panics
    ///
    /// Panics if the round fails.
    pub fn start_shard(&mut self, shard_id: &ShardId, node: NodeId) {
        let result = self.service.apply_started_shard(&self.state, shard_id, node, self.now_us);
        self.commit(result).expect("started-shard round");
    }

    /// Copies currently recovering, with the node doing the recovery.
    #[must_use]
    pub fn recovering(&self) -> Vec<(ShardId, NodeId)> {
        self.state
            .routing_table()
            .iter()
            .filter_map(|routing| match routing.state() {
                ShardState::Initializing => routing.current_node().map(|n| (routing.shard_id().clone(), n)),
                ShardState::Relocating => routing.relocating_node().map(|n| (routing.shard_id().clone(), n)),
                ShardState::Unassigned | ShardState::Started => None,
            })
            .collect()
    }

    /// Reports every recovering copy as started. Returns how many were.
    pub fn start_recoveries(&mut self) -> usize {
        let recovering = self.recovering();
        for (shard_id, node) in &recovering {
            self.start_shard(shard_id, *node);
        }
        recovering.len()
    }

    /// Starts recoveries until none remain and returns the final health.
    pub fn ensure_green(&mut self) -> ClusterHealth {
        for _ in 0..MAX_RECOVERY_WAVES {
            if self.start_recoveries() == 0 {
                break;
            }
        }
        self.health()
    }

    /// Node currently hosting the copy in `slot` of `shard_id`.
    #[must_use]
    pub fn node_of(&self, shard_id: &ShardId, slot: u32) -> Option<NodeId> {
        self.state
            .shard_copies(shard_id)
            .iter()
            .find(|routing| routing.copy_id().slot == slot)
            .and_then(cairn_routing::ShardRouting::current_node)
    }

    fn commit(&mut self, result: RoutingResult<RerouteOutcome>) -> RoutingResult<RerouteOutcome> {
        let outcome = result?;
        self.state = outcome.state.clone();
        self.checker.record(&self.state, &self.stopped);
        Ok(outcome)
    }
}

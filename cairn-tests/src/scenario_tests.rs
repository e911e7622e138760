//! End-to-end allocation scenarios.

use cairn_core::{NodeId, ShardId};
use cairn_routing::{
    AllocationCause, AllocationCommand, AllocationEnable, AllocationStatus, AttributeFilters, ClusterSettings,
    CommandError, HealthStatus, IndexSettings, RerouteRequest, RoutingChange, RoutingError, ShardState,
};

use crate::scenarios::{clusters, delays};
use crate::simulated_cluster::SimulatedCluster;

const INDEX: &str = "test";

fn shard(n: u32) -> ShardId {
    ShardId::new(INDEX, n)
}

// ============================================================================
// Scenario A: retry-failed with an invalid allocate-replica
// ============================================================================

#[test]
fn test_scenario_retry_failed_with_invalid_replica_command() {
    let mut cluster = SimulatedCluster::new(clusters::TWO_NODE);
    cluster.create_index(INDEX, IndexSettings::new(2, 1)).unwrap();

    // Allocation is disabled while the primaries are still recovering.
    cluster.set_cluster_settings(ClusterSettings {
        allocation_enable: AllocationEnable::None,
        ..ClusterSettings::default()
    });
    cluster.start_recoveries();
    let before = cluster.state().clone();

    let request = RerouteRequest::new()
        .with_retry_failed(true)
        .with_command(AllocationCommand::AllocateReplica {
            index: INDEX.into(),
            shard_number: 1,
            node_id: NodeId::new(99),
            allow_force: false,
        });
    let outcome = cluster.reroute(&request).unwrap();

    assert_eq!(outcome.command_results.len(), 1);
    assert!(matches!(
        outcome.command_results[0].outcome,
        Err(CommandError::UnknownNode { node }) if node == NodeId::new(99)
    ));
    for n in 0..2 {
        assert_eq!(
            cluster.state().shard_copies(&shard(n)),
            before.shard_copies(&shard(n)),
            "shard {n} changed"
        );
    }
    assert!(outcome.diff.is_empty());
    cluster.checker().assert_ok("scenario A");
}

#[test]
fn test_unknown_shard_rejects_whole_request() {
    let mut cluster = SimulatedCluster::new(clusters::TWO_NODE);
    cluster.create_index(INDEX, IndexSettings::new(2, 1)).unwrap();
    let version = cluster.state().version();

    let request = RerouteRequest::new().with_command(AllocationCommand::AllocateReplica {
        index: INDEX.into(),
        shard_number: 7,
        node_id: NodeId::new(1),
        allow_force: false,
    });
    assert!(matches!(cluster.reroute(&request), Err(RoutingError::UnknownShard { .. })));

    let request = RerouteRequest::new().with_command(AllocationCommand::Cancel {
        index: "missing".into(),
        shard_number: 0,
        node_id: NodeId::new(1),
        allow_force: false,
    });
    assert!(matches!(cluster.reroute(&request), Err(RoutingError::UnknownIndex { .. })));
    assert_eq!(cluster.state().version(), version);
}

// ============================================================================
// Scenario B: no delay
// ============================================================================

#[test]
fn test_scenario_node_left_without_delay() {
    let mut cluster = SimulatedCluster::new(clusters::THREE_NODE);
    cluster
        .create_index(INDEX, IndexSettings::new(1, 1).with_node_left_delay_us(delays::NONE))
        .unwrap();
    assert_eq!(cluster.ensure_green().status, HealthStatus::Green);

    let victim = cluster.node_of(&shard(0), 1).unwrap();
    cluster.stop_node(victim);

    assert_eq!(cluster.health().delayed_unassigned_shards, 0);
    let replacement = cluster.node_of(&shard(0), 1).unwrap();
    assert_ne!(replacement, victim);
    assert!(!cluster.is_stopped(replacement));

    assert_eq!(cluster.ensure_green().status, HealthStatus::Green);
    cluster.checker().assert_ok("scenario B");
}

// ============================================================================
// Scenario C: one-hour delay
// ============================================================================

fn delayed_cluster() -> (SimulatedCluster, NodeId) {
    let mut cluster = SimulatedCluster::new(clusters::THREE_NODE);
    cluster
        .create_index(INDEX, IndexSettings::new(1, 1).with_node_left_delay_us(delays::HOUR))
        .unwrap();
    cluster.ensure_green();
    let victim = cluster.node_of(&shard(0), 1).unwrap();
    cluster.stop_node(victim);
    (cluster, victim)
}

#[test]
fn test_scenario_delay_holds_until_timeout() {
    let (mut cluster, _victim) = delayed_cluster();
    assert_eq!(cluster.health().delayed_unassigned_shards, 1);
    assert_eq!(cluster.health().status, HealthStatus::Yellow);

    cluster.advance(delays::HOUR - 1);
    cluster.reroute(&RerouteRequest::new()).unwrap();
    assert_eq!(cluster.health().delayed_unassigned_shards, 1);
    assert_eq!(cluster.node_of(&shard(0), 1), None);
    let info = cluster
        .state()
        .unassigned_info(&cairn_routing::CopyId::new(shard(0), 1))
        .unwrap();
    assert_eq!(info.status, AllocationStatus::Delayed);

    cluster.advance(1);
    cluster.reroute(&RerouteRequest::new()).unwrap();
    assert_eq!(cluster.health().delayed_unassigned_shards, 0);
    assert!(cluster.node_of(&shard(0), 1).is_some());
    assert_eq!(cluster.ensure_green().status, HealthStatus::Green);
    cluster.checker().assert_ok("scenario C timeout");
}

#[test]
fn test_scenario_restart_reattaches_without_failure() {
    let (mut cluster, victim) = delayed_cluster();
    assert_eq!(cluster.health().delayed_unassigned_shards, 1);

    cluster.advance(delays::MINUTE);
    cluster.restart_node(victim);

    assert_eq!(cluster.health().delayed_unassigned_shards, 0);
    assert_eq!(cluster.node_of(&shard(0), 1), Some(victim));
    let copy = cairn_routing::CopyId::new(shard(0), 1);
    assert_eq!(cluster.state().failures().count(&copy), 0);
    assert_eq!(cluster.ensure_green().status, HealthStatus::Green);
    cluster.checker().assert_ok("scenario C restart");
}

#[test]
fn test_restart_after_timeout_does_not_move_back() {
    let (mut cluster, victim) = delayed_cluster();
    cluster.advance(delays::HOUR);
    cluster.reroute(&RerouteRequest::new()).unwrap();
    let replacement = cluster.node_of(&shard(0), 1).unwrap();

    cluster.restart_node(victim);
    assert_eq!(cluster.node_of(&shard(0), 1), Some(replacement));
    cluster.checker().assert_ok("restart after timeout");
}

#[test]
fn test_restart_reattach_is_reported_in_diff() {
    let (mut cluster, victim) = delayed_cluster();
    let result = {
        let state = cluster.state().clone();
        let service = cairn_routing::AllocationService::new(cairn_core::AllocationLimits::new()).unwrap();
        let node = cairn_routing::DiscoveryNode::new(victim).with_stored_shards([shard(0)]);
        service.node_joined(&state, node, cluster.now_us()).unwrap()
    };
    assert!(result.diff.changes().iter().any(|change| matches!(
        change,
        RoutingChange::Initialized {
            node,
            cause: AllocationCause::Reattached,
            ..
        } if *node == victim
    )));
}

// ============================================================================
// Retry limit
// ============================================================================

#[test]
fn test_retry_limit_blocks_until_retry_failed() {
    let mut cluster = SimulatedCluster::new(clusters::TWO_NODE);
    cluster
        .create_index(INDEX, IndexSettings::new(1, 1).with_max_retries(3))
        .unwrap();
    let primary_node = cluster.node_of(&shard(0), 0).unwrap();
    cluster.start_shard(&shard(0), primary_node);
    let copy = cairn_routing::CopyId::new(shard(0), 1);

    for attempt in 1..=3 {
        let node = cluster.node_of(&shard(0), 1).expect("replica retried");
        cluster.fail_shard(&shard(0), node, "disk error");
        assert_eq!(cluster.state().failures().count(&copy), attempt);
    }

    // Excluded from automatic placement in later rounds.
    for _ in 0..3 {
        cluster.reroute(&RerouteRequest::new()).unwrap();
        assert_eq!(cluster.node_of(&shard(0), 1), None);
    }
    let info = cluster.state().unassigned_info(&copy).unwrap();
    assert_eq!(info.status, AllocationStatus::RetriesExhausted);
    assert_eq!(info.last_failure.as_deref(), Some("disk error"));

    cluster.reroute(&RerouteRequest::new().with_retry_failed(true)).unwrap();
    assert!(cluster.node_of(&shard(0), 1).is_some());
    assert_eq!(cluster.state().failures().count(&copy), 0);

    let node = cluster.node_of(&shard(0), 1).unwrap();
    cluster.fail_shard(&shard(0), node, "disk error");
    assert_eq!(cluster.state().failures().count(&copy), 1);

    assert_eq!(cluster.ensure_green().status, HealthStatus::Green);
    assert_eq!(cluster.state().failures().count(&copy), 0);
    cluster.checker().assert_ok("retry limit");
}

#[test]
fn test_manual_allocate_clears_failures() {
    let mut cluster = SimulatedCluster::new(clusters::TWO_NODE);
    cluster
        .create_index(INDEX, IndexSettings::new(1, 1).with_max_retries(1))
        .unwrap();
    let primary_node = cluster.node_of(&shard(0), 0).unwrap();
    cluster.start_shard(&shard(0), primary_node);
    let replica_node = cluster.node_of(&shard(0), 1).unwrap();
    cluster.fail_shard(&shard(0), replica_node, "boom");
    assert_eq!(cluster.node_of(&shard(0), 1), None);

    let outcome = cluster
        .reroute(&RerouteRequest::new().with_command(AllocationCommand::AllocateReplica {
            index: INDEX.into(),
            shard_number: 0,
            node_id: replica_node,
            allow_force: false,
        }))
        .unwrap();
    assert!(outcome.command_results[0].is_applied());
    assert_eq!(cluster.node_of(&shard(0), 1), Some(replica_node));
    assert_eq!(
        cluster
            .state()
            .failures()
            .count(&cairn_routing::CopyId::new(shard(0), 1)),
        0
    );
}

// ============================================================================
// Placement constraints
// ============================================================================

#[test]
fn test_excluded_node_receives_nothing() {
    let mut cluster = SimulatedCluster::new(clusters::THREE_NODE);
    let mut filters = AttributeFilters::default();
    filters.exclude.insert("_id".to_string(), vec!["1".to_string()]);
    cluster
        .create_index(INDEX, IndexSettings::new(3, 1).with_filters(filters))
        .unwrap();
    cluster.ensure_green();

    for routing in cluster.state().routing_table().iter() {
        assert_ne!(routing.current_node(), Some(NodeId::new(1)));
        assert_eq!(routing.state(), ShardState::Started);
    }
}

#[test]
fn test_awareness_spreads_copies_across_zones() {
    let mut cluster = SimulatedCluster::new(0);
    for (id, zone) in [(1, "a"), (2, "a"), (3, "b"), (4, "b")] {
        cluster.add_node(cairn_routing::DiscoveryNode::new(NodeId::new(id)).with_attribute("zone", zone));
    }
    cluster.set_cluster_settings(ClusterSettings {
        awareness_attributes: vec!["zone".to_string()],
        ..ClusterSettings::default()
    });
    cluster.create_index(INDEX, IndexSettings::new(2, 1)).unwrap();
    cluster.ensure_green();

    for n in 0..2 {
        let zones: Vec<_> = cluster
            .state()
            .shard_copies(&shard(n))
            .iter()
            .filter_map(|routing| routing.current_node())
            .filter_map(|node| cluster.state().node(node).and_then(|d| d.attribute("zone")))
            .collect();
        assert_eq!(zones.len(), 2);
        assert_ne!(zones[0], zones[1], "shard {n} copies share a zone");
    }
}

#[test]
fn test_replica_count_changes_keep_invariants() {
    let mut cluster = SimulatedCluster::new(clusters::THREE_NODE);
    cluster.create_index(INDEX, IndexSettings::new(2, 0)).unwrap();
    cluster.ensure_green();

    cluster.set_replicas(INDEX, 2).unwrap();
    assert_eq!(cluster.ensure_green().active_shards, 6);
    cluster.set_replicas(INDEX, 1).unwrap();
    assert_eq!(cluster.health().active_shards, 4);
    cluster.delete_index(INDEX).unwrap();
    assert!(cluster.state().routing_table().is_empty());
    cluster.checker().assert_ok("replica changes");
}

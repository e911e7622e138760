//! Cluster actor integration tests.
//!
//! A fake data mover consumes `StartRecovery` outputs and reports them back
//! as started, the way a real recovery service would.

use std::sync::Arc;

use cairn_core::{NodeId, ShardId};
use cairn_routing::{
    AllocationCommand, ClusterSettings, ClusterState, CopyId, DiscoveryNode, HealthStatus, IndexSettings,
    RerouteRequest,
};
use cairn_server::{spawn_cluster_actor, ClusterActorHandle, ManualClock, ServiceConfig, ServiceOutput};
use tokio::sync::mpsc;

use crate::scenarios::delays;

async fn cluster(nodes: u64) -> (ClusterActorHandle, mpsc::Receiver<ServiceOutput>, ManualClock) {
    let clock = ManualClock::new(0);
    let (handle, outputs) = spawn_cluster_actor(
        ServiceConfig::new(),
        Arc::new(clock.clone()),
        ClusterState::new(ClusterSettings::default()),
    )
    .unwrap();
    for id in 1..=nodes {
        handle.node_joined(DiscoveryNode::new(NodeId::new(id))).await.unwrap();
    }
    (handle, outputs, clock)
}

/// Completes every recovery the actor asked for, including the ones
/// unblocked along the way.
async fn run_data_mover(handle: &ClusterActorHandle, outputs: &mut mpsc::Receiver<ServiceOutput>) -> usize {
    let mut completed = 0;
    while let Ok(ServiceOutput::StartRecovery { copy, node, .. }) = outputs.try_recv() {
        handle.shard_started(copy.shard_id, node).await.unwrap();
        completed += 1;
    }
    completed
}

#[tokio::test]
async fn test_service_reaches_green() {
    let (handle, mut outputs, _clock) = cluster(3).await;
    handle.create_index("logs", IndexSettings::new(3, 2)).await.unwrap();

    let completed = run_data_mover(&handle, &mut outputs).await;
    assert_eq!(completed, 9);
    assert_eq!(handle.health().await.unwrap().status, HealthStatus::Green);
}

#[tokio::test]
async fn test_service_published_snapshots_are_valid() {
    let (handle, mut outputs, clock) = cluster(3).await;
    let mut snapshots = handle.subscribe();
    let watcher = tokio::spawn(async move {
        let mut versions = Vec::new();
        while snapshots.changed().await.is_ok() {
            let state = snapshots.borrow_and_update().clone();
            cairn_routing::invariants::check(&state).unwrap();
            versions.push(state.version());
        }
        versions
    });

    handle
        .create_index("logs", IndexSettings::new(2, 1).with_node_left_delay_us(delays::MINUTE))
        .await
        .unwrap();
    run_data_mover(&handle, &mut outputs).await;
    handle.node_left(NodeId::new(2)).await.unwrap();
    assert_eq!(handle.health().await.unwrap().delayed_unassigned_shards, 2);

    clock.advance(delays::MINUTE);
    handle.reroute(RerouteRequest::new()).await.unwrap();
    run_data_mover(&handle, &mut outputs).await;
    assert_eq!(handle.health().await.unwrap().status, HealthStatus::Green);

    handle.shutdown().await.unwrap();
    drop(handle);
    // The watch channel may skip versions but never goes backwards.
    let versions = watcher.await.unwrap();
    assert!(!versions.is_empty());
    assert!(versions.windows(2).all(|pair| pair[0] < pair[1]));
}

#[tokio::test]
async fn test_service_delayed_copy_reattaches_on_restart() {
    let (handle, mut outputs, clock) = cluster(3).await;
    handle
        .create_index("logs", IndexSettings::new(1, 1).with_node_left_delay_us(delays::HOUR))
        .await
        .unwrap();
    run_data_mover(&handle, &mut outputs).await;

    let replica = CopyId::new(ShardId::new("logs", 0), 1);
    let state = handle.state().await.unwrap();
    let victim = state.routing(&replica).and_then(|r| r.current_node()).unwrap();
    let data = state.node(victim).unwrap().stored_shards.clone();

    handle.node_left(victim).await.unwrap();
    assert_eq!(handle.health().await.unwrap().delayed_unassigned_shards, 1);

    clock.advance(delays::MINUTE);
    handle
        .node_joined(DiscoveryNode::new(victim).with_stored_shards(data))
        .await
        .unwrap();
    assert_eq!(handle.health().await.unwrap().delayed_unassigned_shards, 0);
    assert!(matches!(
        outputs.try_recv(),
        Ok(ServiceOutput::StartRecovery { copy, node, .. }) if copy == replica && node == victim
    ));

    let state = handle.state().await.unwrap();
    assert_eq!(state.failures().count(&replica), 0);
}

#[tokio::test]
async fn test_service_bad_command_reported_per_command() {
    let (handle, mut outputs, _clock) = cluster(2).await;
    handle.create_index("logs", IndexSettings::new(2, 1)).await.unwrap();
    run_data_mover(&handle, &mut outputs).await;
    let before = handle.state().await.unwrap();

    let response = handle
        .reroute(
            RerouteRequest::new()
                .with_retry_failed(true)
                .with_command(AllocationCommand::Cancel {
                    index: "logs".into(),
                    shard_number: 1,
                    node_id: NodeId::new(42),
                    allow_force: false,
                })
                .with_command(AllocationCommand::AllocateReplica {
                    index: "logs".into(),
                    shard_number: 0,
                    node_id: NodeId::new(1),
                    allow_force: false,
                }),
        )
        .await
        .unwrap();

    assert_eq!(response.command_results.len(), 2);
    assert!(response.command_results.iter().all(|result| !result.is_applied()));
    assert!(response.diff.is_empty());
    let after = handle.state().await.unwrap();
    assert_eq!(after.routing_table(), before.routing_table());
    assert_eq!(after.version(), response.version);
}

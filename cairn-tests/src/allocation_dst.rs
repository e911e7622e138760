//! Seeded randomized allocation tests.
//!
//! Each run drives a five-node cluster through membership churn, copy
//! failures, time jumps, reroutes and operator commands drawn from a
//! seeded `StdRng`. The
//! property checker validates every published snapshot; at the end every
//! node is restarted and the cluster must converge to green.

#![allow(clippy::cast_possible_truncation)] // Seed-derived indices are small

use cairn_core::{AllocationLimits, IndexName, NodeId};
use cairn_routing::{HealthStatus, IndexSettings, RerouteRequest};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing_subscriber::EnvFilter;

use crate::scenarios::events::{random_event, Event};
use crate::scenarios::{clusters, delays, seeds};
use crate::simulated_cluster::SimulatedCluster;

const INDEX: &str = "dst";

/// Steps per run.
const STEPS: usize = 300;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn run_seed(seed: u64, steps: usize) {
    let mut rng = StdRng::seed_from_u64(seed);
    let nodes = clusters::FIVE_NODE;
    let limits = AllocationLimits {
        node_concurrent_recoveries: rng.gen_range(1..=3),
        ..AllocationLimits::new()
    };
    let delay = if rng.gen_bool(0.5) { delays::NONE } else { delays::MINUTE };

    let mut cluster = SimulatedCluster::with_limits(nodes, limits);
    cluster
        .create_index(
            INDEX,
            IndexSettings::new(rng.gen_range(1..=4), 1)
                .with_node_left_delay_us(delay)
                .with_max_retries(3),
        )
        .unwrap();

    for step in 0..steps {
        let event = random_event(&mut rng, nodes, 2 * delays::MINUTE);
        apply(&mut cluster, &mut rng, event);
        assert!(
            cluster.checker().violations().is_empty(),
            "seed {seed} step {step} after {event:?}: {}",
            cluster.checker().violations()[0]
        );
    }

    // Heal: every node back, every delay expired, every block lifted.
    for id in 1..=nodes {
        if cluster.is_stopped(NodeId::new(id)) {
            cluster.restart_node(NodeId::new(id));
        }
    }
    cluster.advance(delays::HOUR);
    cluster.reroute(&RerouteRequest::new().with_retry_failed(true)).unwrap();
    let health = cluster.ensure_green();

    assert_eq!(health.status, HealthStatus::Green, "seed {seed}: {health:?}");
    assert_eq!(health.delayed_unassigned_shards, 0, "seed {seed}");
    cluster.checker().assert_ok(&format!("seed {seed}"));
}

fn apply(cluster: &mut SimulatedCluster, rng: &mut StdRng, event: Event) {
    match event {
        Event::StopNode(node) => {
            let running = cluster.state().nodes().len();
            if !cluster.is_stopped(node) && running > 1 {
                cluster.stop_node(node);
            }
        }
        Event::RestartNode(node) => {
            if cluster.is_stopped(node) {
                cluster.restart_node(node);
            }
        }
        Event::StartOne => {
            let recovering = cluster.recovering();
            if !recovering.is_empty() {
                let (shard_id, node) = recovering[rng.gen_range(0..recovering.len())].clone();
                cluster.start_shard(&shard_id, node);
            }
        }
        Event::StartAll => {
            cluster.start_recoveries();
        }
        Event::FailOne => {
            let assigned: Vec<_> = cluster
                .state()
                .routing_table()
                .iter()
                .filter_map(|routing| {
                    let node = if rng.gen_bool(0.5) {
                        routing.relocating_node().or_else(|| routing.current_node())
                    } else {
                        routing.current_node()
                    };
                    node.map(|node| (routing.shard_id().clone(), node))
                })
                .collect();
            if !assigned.is_empty() {
                let (shard_id, node) = assigned[rng.gen_range(0..assigned.len())].clone();
                cluster.fail_shard(&shard_id, node, "simulated failure");
            }
        }
        Event::Advance(delta_us) => cluster.advance(delta_us),
        Event::Reroute { retry_failed } => {
            cluster
                .reroute(&RerouteRequest::new().with_retry_failed(retry_failed))
                .unwrap();
        }
        Event::SetReplicas(replicas) => {
            cluster.set_replicas(INDEX, replicas).unwrap();
        }
        Event::Command(command) => {
            let number_of_shards = cluster
                .state()
                .metadata()
                .index(&IndexName::new(INDEX))
                .map_or(1, |index| index.settings.number_of_shards);
            let retry_failed = rng.gen_bool(0.2);
            let request = RerouteRequest::new()
                .with_retry_failed(retry_failed)
                .with_command(command.to_command(INDEX, number_of_shards));

            // The same round without the command.
            let baseline = cluster
                .dry_run(&RerouteRequest::new().with_retry_failed(retry_failed))
                .unwrap();
            let outcome = cluster.reroute(&request).unwrap();
            if !outcome.command_results[0].is_applied() {
                assert_eq!(
                    outcome.state.routing_table(),
                    baseline.state.routing_table(),
                    "rejected {command:?} changed the routing table: {:?}",
                    outcome.command_results[0].outcome
                );
            }
        }
    }
}

#[test]
fn test_dst_allocation_regression_seeds() {
    init_tracing();
    for &seed in seeds::REGRESSION_SEEDS {
        run_seed(seed, STEPS);
    }
}

#[test]
fn test_dst_allocation_ci_seeds() {
    init_tracing();
    for seed in 0..u64::from(seeds::CI_SEED_COUNT) {
        run_seed(seed.wrapping_mul(0x9E37_79B9_7F4A_7C15), STEPS / 3);
    }
}

#[test]
fn test_dst_allocation_is_deterministic() {
    let run = |seed| {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut cluster = SimulatedCluster::new(clusters::FIVE_NODE);
        cluster.create_index(INDEX, IndexSettings::new(3, 1)).unwrap();
        for _ in 0..100 {
            let event = random_event(&mut rng, clusters::FIVE_NODE, delays::MINUTE);
            apply(&mut cluster, &mut rng, event);
        }
        cluster.state().clone()
    };
    assert_eq!(run(42), run(42));
}

use std::sync::Arc;
use std::time::Duration;

use cairn_routing::{
    AllocationService, ClusterHealth, ClusterState, DelayScheduler, RerouteOutcome, RerouteRequest, RoutingResult,
};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, instrument, warn};

use super::{ClusterActorHandle, ClusterCommand, RerouteResponse, ServiceOutput};
use crate::clock::Clock;
use crate::config::ServiceConfig;
use crate::error::ServiceResult;

/// Creates the cluster actor and returns a handle to communicate with it.
///
/// The actor runs in its own tokio task, starting from `initial`.
///
/// # Returns
///
/// A tuple of (handle, `output_receiver`) where `output_receiver` yields
/// the recoveries the data mover should start.
///
/// # Errors
///
/// Returns an error if the config does not validate.
pub fn spawn_cluster_actor(
    config: ServiceConfig,
    clock: Arc<dyn Clock>,
    initial: ClusterState,
) -> ServiceResult<(ClusterActorHandle, mpsc::Receiver<ServiceOutput>)> {
    config.validate()?;
    let service = AllocationService::new(config.limits)?;

    let (cmd_tx, cmd_rx) = mpsc::channel(config.channel_buffer_size);
    let (output_tx, output_rx) = mpsc::channel(config.channel_buffer_size);
    let (snapshot_tx, snapshot_rx) = watch::channel(initial.clone());

    let actor = ClusterActor {
        service,
        clock,
        state: initial,
        cmd_rx,
        output_tx,
        snapshot_tx,
        stalled_version: None,
    };
    tokio::spawn(actor.run());

    Ok((ClusterActorHandle::new(cmd_tx, snapshot_rx), output_rx))
}

struct ClusterActor {
    service: AllocationService,
    clock: Arc<dyn Clock>,
    state: ClusterState,
    cmd_rx: mpsc::Receiver<ClusterCommand>,
    output_tx: mpsc::Sender<ServiceOutput>,
    snapshot_tx: watch::Sender<ClusterState>,
    /// Version whose delay-expiry reroute was rejected. Its expiry timer is
    /// not re-armed until another round publishes.
    stalled_version: Option<u64>,
}

impl ClusterActor {
    #[instrument(skip(self), fields(version = self.state.version()))]
    async fn run(mut self) {
        info!("Cluster actor started");

        loop {
            let wake = self.next_delay_expiry();
            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        None | Some(ClusterCommand::Shutdown) => break,
                        Some(cmd) => self.handle(cmd).await,
                    }
                }
                () = sleep_for(wake) => {
                    debug!("node-left delay expired, rerouting");
                    let now_us = self.clock.now_us();
                    let result = self.service.reroute(&self.state, &RerouteRequest::new(), now_us);
                    if let Err(err) = self.publish(result).await {
                        warn!(error = %err, "delay-expiry reroute rejected");
                        self.stalled_version = Some(self.state.version());
                    }
                }
            }
        }

        info!(version = self.state.version(), "Cluster actor stopped");
    }

    async fn handle(&mut self, cmd: ClusterCommand) {
        let now_us = self.clock.now_us();
        match cmd {
            ClusterCommand::NodeJoined { node, reply } => {
                let result = self.service.node_joined(&self.state, node, now_us);
                let _ = reply.send(self.publish_version(result).await);
            }
            ClusterCommand::NodeLeft { node, reply } => {
                let result = self.service.node_left(&self.state, node, now_us);
                let _ = reply.send(self.publish_version(result).await);
            }
            ClusterCommand::ShardStarted { shard_id, node, reply } => {
                let result = self.service.apply_started_shard(&self.state, &shard_id, node, now_us);
                let _ = reply.send(self.publish_version(result).await);
            }
            ClusterCommand::ShardFailed {
                shard_id,
                node,
                detail,
                reply,
            } => {
                let result = self
                    .service
                    .apply_failed_shard(&self.state, &shard_id, node, &detail, now_us);
                let _ = reply.send(self.publish_version(result).await);
            }
            ClusterCommand::CreateIndex { name, settings, reply } => {
                let result = self.service.create_index(&self.state, &name, settings, now_us);
                let _ = reply.send(self.publish_version(result).await);
            }
            ClusterCommand::Reroute { request, reply } => {
                let result = self.service.reroute(&self.state, &request, now_us);
                let _ = reply.send(self.publish(result).await);
            }
            ClusterCommand::Health { reply } => {
                let _ = reply.send(ClusterHealth::from_state(&self.state));
            }
            ClusterCommand::State { reply } => {
                let _ = reply.send(self.state.clone());
            }
            ClusterCommand::Shutdown => {}
        }
    }

    async fn publish_version(&mut self, result: RoutingResult<RerouteOutcome>) -> ServiceResult<u64> {
        self.publish(result).await.map(|response| response.version)
    }

    /// Makes a round's snapshot current and emits its recoveries.
    async fn publish(&mut self, result: RoutingResult<RerouteOutcome>) -> ServiceResult<RerouteResponse> {
        let outcome = result?;
        self.state = outcome.state;
        self.snapshot_tx.send_replace(self.state.clone());

        let version = self.state.version();
        for (copy, node) in outcome.diff.recoveries() {
            let output = ServiceOutput::StartRecovery { copy, node, version };
            if self.output_tx.send(output).await.is_err() {
                debug!("output receiver dropped, discarding recovery");
            }
        }
        Ok(RerouteResponse {
            version,
            command_results: outcome.command_results,
            diff: outcome.diff,
        })
    }

    /// Time until the earliest delayed copy becomes eligible.
    fn next_delay_expiry(&self) -> Option<Duration> {
        if self.stalled_version == Some(self.state.version()) {
            return None;
        }
        DelayScheduler::next_expiry_us(&self.state)
            .map(|at_us| Duration::from_micros(at_us.saturating_sub(self.clock.now_us())))
    }
}

async fn sleep_for(wake: Option<Duration>) {
    match wake {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending().await,
    }
}

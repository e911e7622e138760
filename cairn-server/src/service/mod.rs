//! Cluster actor: the single serialization point for reroute rounds.
//!
//! # Architecture
//!
//! ```text
//! membership / shard reports / operator requests
//!       │
//!       ▼
//! ┌─────────────────┐
//! │  ClusterActor   │──────► watch: published snapshots (version order)
//! │ - ClusterState  │
//! │ - Allocation-   │──────► mpsc: ServiceOutput::StartRecovery
//! │   Service       │
//! └─────────────────┘
//!       ▲
//!       │ sleep until the earliest delay expiry, then reroute
//! ```
//!
//! Commands are processed strictly in arrival order. A rejected round
//! replies with the error and leaves the published snapshot untouched.

mod cluster_actor;

use cairn_core::{NodeId, ShardId};
use cairn_routing::{
    ClusterHealth, ClusterState, CommandResult, CopyId, DiscoveryNode, IndexSettings, RerouteRequest, RoutingDiff,
};
use tokio::sync::{mpsc, oneshot, watch};

use crate::error::{ServiceError, ServiceResult};

pub use cluster_actor::spawn_cluster_actor;

/// Reply carrying the version of the snapshot a round published.
type VersionReply = oneshot::Sender<ServiceResult<u64>>;

/// Commands sent to the cluster actor.
#[derive(Debug)]
pub enum ClusterCommand {
    /// A node joined, or restarted on its data location.
    NodeJoined {
        /// The joining node.
        node: DiscoveryNode,
        /// Published version.
        reply: VersionReply,
    },

    /// A node left the cluster.
    NodeLeft {
        /// The departed node.
        node: NodeId,
        /// Published version.
        reply: VersionReply,
    },

    /// A copy finished recovering.
    ShardStarted {
        /// The shard.
        shard_id: ShardId,
        /// Node reporting the recovery.
        node: NodeId,
        /// Published version.
        reply: VersionReply,
    },

    /// A copy failed on a node.
    ShardFailed {
        /// The shard.
        shard_id: ShardId,
        /// Node reporting the failure.
        node: NodeId,
        /// Failure detail.
        detail: String,
        /// Published version.
        reply: VersionReply,
    },

    /// Create an index.
    CreateIndex {
        /// Index name.
        name: String,
        /// Index settings.
        settings: IndexSettings,
        /// Published version.
        reply: VersionReply,
    },

    /// Explicit reroute with optional commands and `retry_failed`.
    Reroute {
        /// The request.
        request: RerouteRequest,
        /// Per-command results and the published diff.
        reply: oneshot::Sender<ServiceResult<RerouteResponse>>,
    },

    /// Health of the current snapshot.
    Health {
        /// Channel to receive the summary.
        reply: oneshot::Sender<ClusterHealth>,
    },

    /// The current snapshot.
    State {
        /// Channel to receive the snapshot.
        reply: oneshot::Sender<ClusterState>,
    },

    /// Graceful shutdown.
    Shutdown,
}

/// Answer to an explicit reroute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RerouteResponse {
    /// Version of the published snapshot.
    pub version: u64,
    /// One result per command, in request order.
    pub command_results: Vec<CommandResult>,
    /// Placements the round added, removed or moved.
    pub diff: RoutingDiff,
}

/// Work the actor hands to the outside world.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceOutput {
    /// Start recovering `copy` on `node`: a new placement or a move target.
    StartRecovery {
        /// The copy to recover.
        copy: CopyId,
        /// Node that should recover it.
        node: NodeId,
        /// Snapshot version that made the decision.
        version: u64,
    },
}

/// Handle for sending commands to the cluster actor.
#[derive(Debug, Clone)]
pub struct ClusterActorHandle {
    /// Channel to send commands.
    tx: mpsc::Sender<ClusterCommand>,
    /// Latest published snapshot.
    snapshots: watch::Receiver<ClusterState>,
}

impl ClusterActorHandle {
    pub(crate) const fn new(tx: mpsc::Sender<ClusterCommand>, snapshots: watch::Receiver<ClusterState>) -> Self {
        Self { tx, snapshots }
    }

    /// Reports a joining node.
    ///
    /// # Errors
    ///
    /// Returns an error if the round fails or the actor has shut down.
    pub async fn node_joined(&self, node: DiscoveryNode) -> ServiceResult<u64> {
        self.request(|reply| ClusterCommand::NodeJoined { node, reply }).await?
    }

    /// Reports a departed node.
    ///
    /// # Errors
    ///
    /// Returns an error if the round fails or the actor has shut down.
    pub async fn node_left(&self, node: NodeId) -> ServiceResult<u64> {
        self.request(|reply| ClusterCommand::NodeLeft { node, reply }).await?
    }

    /// Reports a finished recovery.
    ///
    /// # Errors
    ///
    /// Returns an error if the round fails or the actor has shut down.
    pub async fn shard_started(&self, shard_id: ShardId, node: NodeId) -> ServiceResult<u64> {
        self.request(|reply| ClusterCommand::ShardStarted { shard_id, node, reply })
            .await?
    }

    /// Reports a failed copy.
    ///
    /// # Errors
    ///
    /// Returns an error if the round fails or the actor has shut down.
    pub async fn shard_failed(&self, shard_id: ShardId, node: NodeId, detail: impl Into<String>) -> ServiceResult<u64> {
        let detail = detail.into();
        self.request(|reply| ClusterCommand::ShardFailed {
            shard_id,
            node,
            detail,
            reply,
        })
        .await?
    }

    /// Creates an index.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings are invalid, the index exists, or
    /// the actor has shut down.
    pub async fn create_index(&self, name: impl Into<String>, settings: IndexSettings) -> ServiceResult<u64> {
        let name = name.into();
        self.request(|reply| ClusterCommand::CreateIndex { name, settings, reply })
            .await?
    }

    /// Runs an explicit reroute.
    ///
    /// # Errors
    ///
    /// Returns an error if a command names an unknown shard or the actor
    /// has shut down. Per-command rejections are in the response.
    pub async fn reroute(&self, request: RerouteRequest) -> ServiceResult<RerouteResponse> {
        self.request(|reply| ClusterCommand::Reroute { request, reply }).await?
    }

    /// Returns the health of the current snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the actor has shut down.
    pub async fn health(&self) -> ServiceResult<ClusterHealth> {
        self.request(|reply| ClusterCommand::Health { reply }).await
    }

    /// Returns the current snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the actor has shut down.
    pub async fn state(&self) -> ServiceResult<ClusterState> {
        self.request(|reply| ClusterCommand::State { reply }).await
    }

    /// Subscribes to published snapshots.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ClusterState> {
        self.snapshots.clone()
    }

    /// Shuts down the actor.
    ///
    /// # Errors
    ///
    /// Returns an error if the actor has already shut down.
    pub async fn shutdown(&self) -> ServiceResult<()> {
        self.tx
            .send(ClusterCommand::Shutdown)
            .await
            .map_err(|_| ServiceError::ActorShutdown)
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> ClusterCommand) -> ServiceResult<T> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.tx
            .send(command(reply_tx))
            .await
            .map_err(|_| ServiceError::ActorShutdown)?;

        reply_rx.await.map_err(|_| ServiceError::ActorShutdown)
    }
}

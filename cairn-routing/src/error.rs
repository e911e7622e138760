//! Routing error types.
//!
//! Two families:
//! - [`RoutingError`] aborts a whole request or round. The previous snapshot
//!   stays authoritative.
//! - [`CommandError`] rejects a single allocation command. Other commands in
//!   the same request still apply.

use cairn_core::{IndexName, NodeId, ShardId};
use thiserror::Error;

use crate::shard::{CopyId, ShardCopyRole, ShardState};

/// Result type for routing operations.
pub type RoutingResult<T> = Result<T, RoutingError>;

/// Errors that abort a reroute request or round.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RoutingError {
    /// The request references an index that does not exist.
    #[error("unknown index: {index}")]
    UnknownIndex {
        /// The missing index.
        index: IndexName,
    },

    /// The request references a shard number outside the index.
    #[error("unknown shard {shard_id}: index has {number_of_shards} shards")]
    UnknownShard {
        /// The missing shard.
        shard_id: ShardId,
        /// Shards configured for the index.
        number_of_shards: u32,
    },

    /// An index with this name already exists.
    #[error("index already exists: {index}")]
    IndexAlreadyExists {
        /// The conflicting index.
        index: IndexName,
    },

    /// Index or cluster settings failed validation.
    #[error("invalid settings: {0}")]
    InvalidSettings(#[from] cairn_core::Error),

    /// A copy was asked to make a transition its state does not allow.
    #[error("cannot {action} {copy} while {from}")]
    InvalidTransition {
        /// The copy.
        copy: CopyId,
        /// Its state at the time.
        from: ShardState,
        /// The attempted transition.
        action: &'static str,
    },

    /// A copy expected in the routing table is missing.
    #[error("copy {copy} not found in routing table")]
    CopyNotFound {
        /// The missing copy.
        copy: CopyId,
    },

    /// The computed snapshot breaks a routing invariant.
    ///
    /// This is a program-correctness bug, never an expected runtime condition.
    #[error("routing invariant violated ({invariant}): {detail}")]
    InvariantViolation {
        /// Which invariant.
        invariant: &'static str,
        /// What was observed.
        detail: String,
    },
}

/// Reasons a single allocation command is rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// The target node is not a live cluster member.
    #[error("node {node} is not a live member of the cluster")]
    UnknownNode {
        /// The requested node.
        node: NodeId,
    },

    /// The shard has no unassigned copy of the requested role.
    #[error("shard {shard_id} has no unassigned {role} copy")]
    NoUnassignedCopy {
        /// The shard.
        shard_id: ShardId,
        /// The requested role.
        role: ShardCopyRole,
    },

    /// A replica cannot be allocated before its primary is active.
    #[error("primary of {shard_id} is not active")]
    PrimaryNotActive {
        /// The shard.
        shard_id: ShardId,
    },

    /// The combined deciders vetoed the placement.
    #[error("allocation of {shard_id} on {node} vetoed by [{decider}]: {reason}")]
    DeciderVeto {
        /// The shard.
        shard_id: ShardId,
        /// The target node.
        node: NodeId,
        /// The vetoing decider.
        decider: &'static str,
        /// The decider's explanation.
        reason: String,
    },

    /// Allocating the primary would lose data and force was not requested.
    #[error("node {node} holds no copy of {shard_id}; allocating the primary there requires allow_force")]
    DataLossNotAccepted {
        /// The shard.
        shard_id: ShardId,
        /// The target node.
        node: NodeId,
    },

    /// The node already hosts a copy of the shard.
    #[error("node {node} already hosts a copy of {shard_id}")]
    ShardAlreadyOnNode {
        /// The shard.
        shard_id: ShardId,
        /// The node.
        node: NodeId,
    },

    /// The node does not host a copy of the shard.
    #[error("node {node} hosts no copy of {shard_id}")]
    NoCopyOnNode {
        /// The shard.
        shard_id: ShardId,
        /// The node.
        node: NodeId,
    },

    /// Cancelling a primary needs allow_force.
    #[error("cancelling primary {shard_id} on {node} requires allow_force")]
    PrimaryCancelNotAllowed {
        /// The shard.
        shard_id: ShardId,
        /// The node.
        node: NodeId,
    },

    /// Only started copies can be moved.
    #[error("copy of {shard_id} on {node} is {state}, only started copies can move")]
    ShardNotStarted {
        /// The shard.
        shard_id: ShardId,
        /// The source node.
        node: NodeId,
        /// The copy's state.
        state: ShardState,
    },
}

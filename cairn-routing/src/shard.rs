//! Shard copies and their lifecycle state machine.
//!
//! A shard copy moves through these states:
//!
//! ```text
//! UNASSIGNED ──► INITIALIZING ──► STARTED ──► RELOCATING ──► STARTED (on target)
//!      ▲               │              │             │
//!      └───────────────┴──────────────┴─────────────┘   (node loss, failure, cancel)
//! ```
//!
//! While RELOCATING, the copy stays on its source node and the target node
//! hosts it as an initializing relocation target. There is no terminal
//! state: an unassigned copy always seeks `STARTED`.
//!
//! `ShardRouting` values are never mutated in place. Every transition
//! consumes the old value and returns a new one, so a routing table is an
//! immutable snapshot.

use std::fmt;

use cairn_core::{NodeId, ShardId};
use serde::{Deserialize, Serialize};

use crate::error::{RoutingError, RoutingResult};

/// Stable identity of one copy of a shard.
///
/// The slot never changes for the life of the copy, even when the copy is
/// promoted from replica to primary. It keys the unassigned registry and
/// the failure ledger.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CopyId {
    /// The shard this copy belongs to.
    pub shard_id: ShardId,
    /// Slot of this copy within the shard, `0..=number_of_replicas`.
    pub slot: u32,
}

impl CopyId {
    /// Creates a copy identifier.
    #[must_use]
    pub const fn new(shard_id: ShardId, slot: u32) -> Self {
        Self { shard_id, slot }
    }
}

impl fmt::Debug for CopyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.shard_id, self.slot)
    }
}

impl fmt::Display for CopyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.shard_id, self.slot)
    }
}

/// Whether a copy is the primary or a replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardCopyRole {
    /// The authoritative copy. Exactly one per shard.
    Primary,
    /// A copy recovered from the primary.
    Replica,
}

impl fmt::Display for ShardCopyRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Replica => write!(f, "replica"),
        }
    }
}

/// Lifecycle state of a shard copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardState {
    /// Not hosted anywhere.
    Unassigned,
    /// Assigned to a node that is recovering the data.
    Initializing,
    /// Active and serving on its node.
    Started,
    /// Active on its source node while a target node recovers it.
    Relocating,
}

impl ShardState {
    /// Returns a human-readable description of the state.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::Unassigned => "unassigned",
            Self::Initializing => "initializing",
            Self::Started => "started",
            Self::Relocating => "relocating",
        }
    }
}

impl fmt::Display for ShardState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Placement record of one shard copy.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardRouting {
    copy_id: CopyId,
    role: ShardCopyRole,
    state: ShardState,
    /// Hosting node. `None` iff unassigned.
    current_node: Option<NodeId>,
    /// Relocation target. `Some` iff relocating.
    relocating_node: Option<NodeId>,
}

impl ShardRouting {
    /// Creates an unassigned copy.
    #[must_use]
    pub const fn unassigned(copy_id: CopyId, role: ShardCopyRole) -> Self {
        Self {
            copy_id,
            role,
            state: ShardState::Unassigned,
            current_node: None,
            relocating_node: None,
        }
    }

    /// Returns the copy identity.
    #[must_use]
    pub const fn copy_id(&self) -> &CopyId {
        &self.copy_id
    }

    /// Returns the shard this copy belongs to.
    #[must_use]
    pub const fn shard_id(&self) -> &ShardId {
        &self.copy_id.shard_id
    }

    /// Returns the copy's role.
    #[must_use]
    pub const fn role(&self) -> ShardCopyRole {
        self.role
    }

    /// Returns true if this copy is the primary.
    #[must_use]
    pub const fn is_primary(&self) -> bool {
        matches!(self.role, ShardCopyRole::Primary)
    }

    /// Returns the lifecycle state.
    #[must_use]
    pub const fn state(&self) -> ShardState {
        self.state
    }

    /// Returns the hosting node, if assigned.
    #[must_use]
    pub const fn current_node(&self) -> Option<NodeId> {
        self.current_node
    }

    /// Returns the relocation target, if relocating.
    #[must_use]
    pub const fn relocating_node(&self) -> Option<NodeId> {
        self.relocating_node
    }

    /// Returns true if the copy is unassigned.
    #[must_use]
    pub const fn is_unassigned(&self) -> bool {
        matches!(self.state, ShardState::Unassigned)
    }

    /// Returns true if the copy serves requests (started or relocating).
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self.state, ShardState::Started | ShardState::Relocating)
    }

    /// Returns every node this copy occupies, including a relocation target.
    pub fn occupied_nodes(&self) -> impl Iterator<Item = NodeId> {
        self.current_node.into_iter().chain(self.relocating_node)
    }

    /// Assigns an unassigned copy to a node.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` unless the copy is unassigned.
    pub fn initialize(self, node: NodeId) -> RoutingResult<Self> {
        self.expect_state(ShardState::Unassigned, "initialize")?;
        Ok(Self {
            state: ShardState::Initializing,
            current_node: Some(node),
            ..self
        })
    }

    /// Marks recovery complete.
    ///
    /// An initializing copy becomes started on its node; a relocating copy
    /// becomes started on its relocation target.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` if the copy is neither initializing nor relocating.
    pub fn start(self) -> RoutingResult<Self> {
        match self.state {
            ShardState::Initializing => Ok(Self {
                state: ShardState::Started,
                ..self
            }),
            ShardState::Relocating => Ok(Self {
                state: ShardState::Started,
                current_node: self.relocating_node,
                relocating_node: None,
                ..self
            }),
            _ => Err(self.invalid("start")),
        }
    }

    /// Begins relocating a started copy to `target`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` unless the copy is started.
    pub fn relocate(self, target: NodeId) -> RoutingResult<Self> {
        self.expect_state(ShardState::Started, "relocate")?;
        Ok(Self {
            state: ShardState::Relocating,
            relocating_node: Some(target),
            ..self
        })
    }

    /// Abandons an in-flight relocation, leaving the copy started on its source.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` unless the copy is relocating.
    pub fn cancel_relocation(self) -> RoutingResult<Self> {
        self.expect_state(ShardState::Relocating, "cancel relocation")?;
        Ok(Self {
            state: ShardState::Started,
            relocating_node: None,
            ..self
        })
    }

    /// Moves the copy back to unassigned, dropping any placement.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` if the copy is already unassigned.
    pub fn unassign(self) -> RoutingResult<Self> {
        if self.is_unassigned() {
            return Err(self.invalid("unassign"));
        }
        Ok(Self {
            state: ShardState::Unassigned,
            current_node: None,
            relocating_node: None,
            ..self
        })
    }

    /// Promotes an active replica to primary.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` unless the copy is an active replica.
    pub fn promote(self) -> RoutingResult<Self> {
        if self.is_primary() || !self.is_active() {
            return Err(self.invalid("promote"));
        }
        Ok(Self {
            role: ShardCopyRole::Primary,
            ..self
        })
    }

    /// Demotes a primary to replica, keeping its placement.
    #[must_use]
    pub fn demote(self) -> Self {
        Self {
            role: ShardCopyRole::Replica,
            ..self
        }
    }

    fn expect_state(&self, required: ShardState, action: &'static str) -> RoutingResult<()> {
        if self.state == required {
            Ok(())
        } else {
            Err(self.invalid(action))
        }
    }

    fn invalid(&self, action: &'static str) -> RoutingError {
        RoutingError::InvalidTransition {
            copy: self.copy_id.clone(),
            from: self.state,
            action,
        }
    }
}

impl fmt::Debug for ShardRouting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.copy_id, self.role, self.state)?;
        if let Some(node) = self.current_node {
            write!(f, " on {node}")?;
        }
        if let Some(target) = self.relocating_node {
            write!(f, " -> {target}")?;
        }
        Ok(())
    }
}

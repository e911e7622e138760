//! Placement changes produced by one round.

use cairn_core::NodeId;
use serde::{Deserialize, Serialize};

use crate::shard::CopyId;
use crate::unassigned::UnassignedReason;

/// Why a copy was placed on a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationCause {
    /// Chosen by automatic allocation.
    Automatic,
    /// Returned to the node that still holds its data.
    Reattached,
    /// Placed by an operator command.
    Manual,
}

/// One change to the routing table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoutingChange {
    /// A new copy was created unassigned.
    Added {
        /// The copy.
        copy: CopyId,
    },
    /// A copy was assigned and starts recovering on `node`.
    Initialized {
        /// The copy.
        copy: CopyId,
        /// Target node.
        node: NodeId,
        /// Why the node was chosen.
        cause: AllocationCause,
    },
    /// A copy finished recovering.
    Started {
        /// The copy.
        copy: CopyId,
        /// Hosting node.
        node: NodeId,
    },
    /// A started copy began moving.
    RelocationStarted {
        /// The copy.
        copy: CopyId,
        /// Source node.
        from: NodeId,
        /// Target node.
        to: NodeId,
    },
    /// A move completed.
    Relocated {
        /// The copy.
        copy: CopyId,
        /// Source node.
        from: NodeId,
        /// Target node.
        to: NodeId,
    },
    /// A move was abandoned; the copy stays on its source.
    RelocationCancelled {
        /// The copy.
        copy: CopyId,
        /// Source node.
        from: NodeId,
        /// Abandoned target.
        to: NodeId,
    },
    /// A copy lost its placement.
    Unassigned {
        /// The copy.
        copy: CopyId,
        /// Node it was on.
        node: Option<NodeId>,
        /// Why.
        reason: UnassignedReason,
    },
    /// A replica became the primary.
    Promoted {
        /// The copy.
        copy: CopyId,
        /// Hosting node.
        node: NodeId,
    },
    /// A copy was deleted.
    Removed {
        /// The copy.
        copy: CopyId,
        /// Node it was on.
        node: Option<NodeId>,
    },
}

/// Ordered list of changes made by one round.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingDiff {
    changes: Vec<RoutingChange>,
}

impl RoutingDiff {
    /// Creates an empty diff.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a change.
    pub fn push(&mut self, change: RoutingChange) {
        self.changes.push(change);
    }

    /// Returns all changes in the order they were made.
    #[must_use]
    pub fn changes(&self) -> &[RoutingChange] {
        &self.changes
    }

    /// Returns true if nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Placements added: copies that start recovering on a node.
    #[must_use]
    pub fn added(&self) -> Vec<(CopyId, NodeId)> {
        self.changes
            .iter()
            .filter_map(|change| match change {
                RoutingChange::Initialized { copy, node, .. } => Some((copy.clone(), *node)),
                _ => None,
            })
            .collect()
    }

    /// Placements removed: copies that left a node without moving.
    #[must_use]
    pub fn removed(&self) -> Vec<(CopyId, NodeId)> {
        self.changes
            .iter()
            .filter_map(|change| match change {
                RoutingChange::Unassigned {
                    copy,
                    node: Some(node),
                    ..
                }
                | RoutingChange::Removed {
                    copy,
                    node: Some(node),
                } => Some((copy.clone(), *node)),
                _ => None,
            })
            .collect()
    }

    /// Placements moved, as `(copy, from, to)`.
    #[must_use]
    pub fn moved(&self) -> Vec<(CopyId, NodeId, NodeId)> {
        self.changes
            .iter()
            .filter_map(|change| match change {
                RoutingChange::Relocated { copy, from, to } => Some((copy.clone(), *from, *to)),
                _ => None,
            })
            .collect()
    }

    /// Recoveries the data mover must start, as `(copy, target node)`.
    #[must_use]
    pub fn recoveries(&self) -> Vec<(CopyId, NodeId)> {
        self.changes
            .iter()
            .filter_map(|change| match change {
                RoutingChange::Initialized { copy, node, .. } => Some((copy.clone(), *node)),
                RoutingChange::RelocationStarted { copy, to, .. } => Some((copy.clone(), *to)),
                _ => None,
            })
            .collect()
    }
}

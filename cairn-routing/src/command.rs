//! Operator allocation commands.
//!
//! Commands run in order inside a round, each against the state left by
//! the previous one. A command is validated completely before it mutates
//! anything; a rejected command leaves the state exactly as it found it
//! and the remaining commands still run.
//!
//! Manual placement ignores `THROTTLE`, honours `NO` unless `allow_force`
//! is set, and clears the copy's failure counter and pending delay.

use cairn_core::{IndexName, NodeId, ShardId};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::allocation::{CopyFailure, RoutingAllocation};
use crate::decider::{AllocationDeciders, Decision};
use crate::diff::AllocationCause;
use crate::error::{CommandError, RoutingError, RoutingResult};
use crate::metadata::Metadata;
use crate::shard::{CopyId, ShardCopyRole, ShardRouting, ShardState};

/// An operator directive, applied within one round and then discarded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum AllocationCommand {
    /// Assign an unassigned replica to a node.
    AllocateReplica {
        /// Index name.
        index: IndexName,
        /// Shard number.
        shard_number: u32,
        /// Target node.
        node_id: NodeId,
        /// Skip the deciders.
        #[serde(default)]
        allow_force: bool,
    },
    /// Assign an unassigned primary to a node.
    AllocatePrimary {
        /// Index name.
        index: IndexName,
        /// Shard number.
        shard_number: u32,
        /// Target node.
        node_id: NodeId,
        /// Skip the deciders and accept losing the shard's existing data.
        #[serde(default)]
        allow_force: bool,
    },
    /// Cancel a copy's placement or in-flight move on a node.
    Cancel {
        /// Index name.
        index: IndexName,
        /// Shard number.
        shard_number: u32,
        /// Node hosting the copy.
        node_id: NodeId,
        /// Required to cancel a primary.
        #[serde(default)]
        allow_force: bool,
    },
    /// Move a started copy between nodes.
    Move {
        /// Index name.
        index: IndexName,
        /// Shard number.
        shard_number: u32,
        /// Current host.
        from_node: NodeId,
        /// Destination.
        to_node: NodeId,
    },
}

impl AllocationCommand {
    /// Returns the shard the command targets.
    #[must_use]
    pub fn shard_id(&self) -> ShardId {
        match self {
            Self::AllocateReplica {
                index, shard_number, ..
            }
            | Self::AllocatePrimary {
                index, shard_number, ..
            }
            | Self::Cancel {
                index, shard_number, ..
            }
            | Self::Move {
                index, shard_number, ..
            } => ShardId::new(index.clone(), *shard_number),
        }
    }

    /// Returns the command's name as it appears on the wire.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::AllocateReplica { .. } => "allocate-replica",
            Self::AllocatePrimary { .. } => "allocate-primary",
            Self::Cancel { .. } => "cancel",
            Self::Move { .. } => "move",
        }
    }
}

/// Outcome of one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    /// The command.
    pub command: AllocationCommand,
    /// `Ok` if applied, the rejection otherwise.
    pub outcome: Result<(), CommandError>,
}

impl CommandResult {
    /// Returns true if the command was applied.
    #[must_use]
    pub const fn is_applied(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Validates and applies allocation commands.
#[derive(Debug, Clone, Copy)]
pub struct CommandExecutor<'a> {
    deciders: &'a AllocationDeciders,
}

impl<'a> CommandExecutor<'a> {
    /// Creates an executor that consults `deciders`.
    #[must_use]
    pub const fn new(deciders: &'a AllocationDeciders) -> Self {
        Self { deciders }
    }

    /// Checks that every command names an existing index and shard.
    ///
    /// # Errors
    ///
    /// Returns `UnknownIndex` or `UnknownShard` for the first bad reference.
    pub fn validate_targets(metadata: &Metadata, commands: &[AllocationCommand]) -> RoutingResult<()> {
        for command in commands {
            let shard_id = command.shard_id();
            let index = metadata
                .index(&shard_id.index)
                .ok_or_else(|| RoutingError::UnknownIndex {
                    index: shard_id.index.clone(),
                })?;
            if shard_id.shard >= index.settings.number_of_shards {
                return Err(RoutingError::UnknownShard {
                    number_of_shards: index.settings.number_of_shards,
                    shard_id,
                });
            }
        }
        Ok(())
    }

    /// Applies commands in order.
    ///
    /// # Errors
    ///
    /// Returns an error only if applying a validated command breaks the
    /// routing table, which aborts the round.
    pub fn execute(
        &self,
        allocation: &mut RoutingAllocation,
        commands: &[AllocationCommand],
    ) -> RoutingResult<Vec<CommandResult>> {
        let mut results = Vec::with_capacity(commands.len());
        for command in commands {
            let outcome = match self.validate(allocation, command) {
                Ok(plan) => {
                    Self::apply(allocation, plan)?;
                    debug!(kind = command.kind(), shard = %command.shard_id(), "applied allocation command");
                    Ok(())
                }
                Err(err) => {
                    warn!(kind = command.kind(), shard = %command.shard_id(), error = %err, "rejected allocation command");
                    Err(err)
                }
            };
            results.push(CommandResult {
                command: command.clone(),
                outcome,
            });
        }
        Ok(results)
    }

    fn validate(&self, allocation: &RoutingAllocation, command: &AllocationCommand) -> Result<Plan, CommandError> {
        let shard_id = command.shard_id();
        match *command {
            AllocationCommand::AllocateReplica {
                node_id, allow_force, ..
            } => {
                Self::live(allocation, node_id)?;
                let copy = Self::unassigned_copy(allocation, &shard_id, ShardCopyRole::Replica)?;
                Self::not_hosting(allocation, &shard_id, node_id)?;
                if !allocation.has_active_primary(&shard_id) {
                    return Err(CommandError::PrimaryNotActive { shard_id });
                }
                if !allow_force {
                    self.no_veto(allocation, &copy, node_id)?;
                }
                Ok(Plan::Allocate {
                    copy: copy.copy_id().clone(),
                    node: node_id,
                })
            }
            AllocationCommand::AllocatePrimary {
                node_id, allow_force, ..
            } => {
                let node = Self::live(allocation, node_id)?;
                let copy = Self::unassigned_copy(allocation, &shard_id, ShardCopyRole::Primary)?;
                Self::not_hosting(allocation, &shard_id, node_id)?;
                let has_data = node.has_shard_data(&shard_id);
                if !allow_force {
                    if allocation.metadata().is_activated(&shard_id) && !has_data {
                        return Err(CommandError::DataLossNotAccepted {
                            shard_id,
                            node: node_id,
                        });
                    }
                    self.no_veto(allocation, &copy, node_id)?;
                }
                Ok(Plan::Allocate {
                    copy: copy.copy_id().clone(),
                    node: node_id,
                })
            }
            AllocationCommand::Cancel {
                node_id, allow_force, ..
            } => {
                let copy = allocation
                    .routing_table()
                    .copy_on_node(&shard_id, node_id)
                    .ok_or(CommandError::NoCopyOnNode {
                        shard_id: shard_id.clone(),
                        node: node_id,
                    })?;
                if copy.state() == ShardState::Relocating {
                    return Ok(Plan::CancelRelocation {
                        copy: copy.copy_id().clone(),
                    });
                }
                if copy.is_primary() && !allow_force {
                    return Err(CommandError::PrimaryCancelNotAllowed {
                        shard_id,
                        node: node_id,
                    });
                }
                Ok(Plan::Cancel {
                    copy: copy.copy_id().clone(),
                })
            }
            AllocationCommand::Move {
                from_node, to_node, ..
            } => {
                let copy = allocation
                    .routing_table()
                    .shard(&shard_id)
                    .unwrap_or(&[])
                    .iter()
                    .find(|routing| routing.current_node() == Some(from_node))
                    .cloned()
                    .ok_or(CommandError::NoCopyOnNode {
                        shard_id: shard_id.clone(),
                        node: from_node,
                    })?;
                if copy.state() != ShardState::Started {
                    return Err(CommandError::ShardNotStarted {
                        shard_id,
                        node: from_node,
                        state: copy.state(),
                    });
                }
                Self::live(allocation, to_node)?;
                self.no_veto(allocation, &copy, to_node)?;
                Ok(Plan::Move {
                    copy: copy.copy_id().clone(),
                    target: to_node,
                })
            }
        }
    }

    fn apply(allocation: &mut RoutingAllocation, plan: Plan) -> RoutingResult<()> {
        match plan {
            Plan::Allocate { copy, node } => {
                allocation.reset_failures(&copy);
                allocation.initialize(&copy, node, AllocationCause::Manual)
            }
            Plan::Cancel { copy } => allocation.fail_copy(&copy, CopyFailure::cancelled()),
            Plan::CancelRelocation { copy } => allocation.cancel_relocation(&copy),
            Plan::Move { copy, target } => allocation.relocate(&copy, target),
        }
    }

    fn unassigned_copy(
        allocation: &RoutingAllocation,
        shard_id: &ShardId,
        role: ShardCopyRole,
    ) -> Result<ShardRouting, CommandError> {
        allocation
            .routing_table()
            .shard(shard_id)
            .unwrap_or(&[])
            .iter()
            .find(|routing| routing.is_unassigned() && routing.role() == role)
            .cloned()
            .ok_or_else(|| CommandError::NoUnassignedCopy {
                shard_id: shard_id.clone(),
                role,
            })
    }

    fn live(allocation: &RoutingAllocation, node: NodeId) -> Result<&crate::nodes::DiscoveryNode, CommandError> {
        allocation
            .nodes()
            .get(node)
            .ok_or(CommandError::UnknownNode { node })
    }

    /// Force skips the deciders but never stacks two copies on one node.
    fn not_hosting(allocation: &RoutingAllocation, shard_id: &ShardId, node: NodeId) -> Result<(), CommandError> {
        if allocation.routing_nodes().hosts_shard(node, shard_id) {
            return Err(CommandError::ShardAlreadyOnNode {
                shard_id: shard_id.clone(),
                node,
            });
        }
        Ok(())
    }

    fn no_veto(&self, allocation: &RoutingAllocation, copy: &ShardRouting, node: NodeId) -> Result<(), CommandError> {
        let target = Self::live(allocation, node)?;
        match self.deciders.can_allocate(copy, target, allocation) {
            Decision::No { decider, reason } => Err(CommandError::DeciderVeto {
                shard_id: copy.shard_id().clone(),
                node,
                decider,
                reason,
            }),
            Decision::Yes | Decision::Throttle { .. } => Ok(()),
        }
    }
}

/// A validated command, ready to apply.
enum Plan {
    Allocate { copy: CopyId, node: NodeId },
    Cancel { copy: CopyId },
    CancelRelocation { copy: CopyId },
    Move { copy: CopyId, target: NodeId },
}

#[cfg(test)]
mod tests {
    use cairn_core::{AllocationLimits, NodeId};

    use super::*;
    use crate::decider::test_support::{allocation, copy, start};
    use crate::metadata::{ClusterSettings, IndexSettings};
    use crate::nodes::DiscoveryNode;

    fn nodes() -> Vec<DiscoveryNode> {
        (1..=3).map(|id| DiscoveryNode::new(NodeId::new(id))).collect()
    }

    fn allocate_replica(node: u64, allow_force: bool) -> AllocationCommand {
        AllocationCommand::AllocateReplica {
            index: IndexName::new("test"),
            shard_number: 0,
            node_id: NodeId::new(node),
            allow_force,
        }
    }

    #[test]
    fn test_command_wire_shape() {
        let command: AllocationCommand = serde_json::from_str(
            r#"{"kind": "allocate-replica", "index": "test", "shardNumber": 1, "nodeId": 7}"#,
        )
        .unwrap();
        assert_eq!(
            command,
            AllocationCommand::AllocateReplica {
                index: IndexName::new("test"),
                shard_number: 1,
                node_id: NodeId::new(7),
                allow_force: false,
            }
        );

        let json = serde_json::to_value(AllocationCommand::Move {
            index: IndexName::new("test"),
            shard_number: 0,
            from_node: NodeId::new(1),
            to_node: NodeId::new(2),
        })
        .unwrap();
        assert_eq!(json["kind"], "move");
        assert_eq!(json["fromNode"], 1);
    }

    #[test]
    fn test_validate_targets() {
        let allocation = allocation(nodes(), ClusterSettings::default(), IndexSettings::new(2, 1));
        let metadata = allocation.metadata();

        assert!(CommandExecutor::validate_targets(metadata, &[allocate_replica(1, false)]).is_ok());

        let unknown_index = AllocationCommand::Cancel {
            index: IndexName::new("missing"),
            shard_number: 0,
            node_id: NodeId::new(1),
            allow_force: false,
        };
        assert!(matches!(
            CommandExecutor::validate_targets(metadata, &[unknown_index]),
            Err(RoutingError::UnknownIndex { .. })
        ));

        let unknown_shard = AllocationCommand::AllocateReplica {
            index: IndexName::new("test"),
            shard_number: 2,
            node_id: NodeId::new(1),
            allow_force: false,
        };
        assert!(matches!(
            CommandExecutor::validate_targets(metadata, &[unknown_shard]),
            Err(RoutingError::UnknownShard { number_of_shards: 2, .. })
        ));
    }

    #[test]
    fn test_unknown_node_leaves_state_untouched() {
        let mut allocation = allocation(nodes(), ClusterSettings::default(), IndexSettings::new(1, 1));
        start(&mut allocation, 0, 0, 1);
        let before = allocation.state().clone();

        let deciders = AllocationDeciders::with_defaults(&AllocationLimits::new());
        let results = CommandExecutor::new(&deciders)
            .execute(&mut allocation, &[allocate_replica(99, false)])
            .unwrap();

        assert_eq!(
            results[0].outcome,
            Err(CommandError::UnknownNode {
                node: NodeId::new(99)
            })
        );
        assert_eq!(allocation.state(), &before);
    }

    #[test]
    fn test_commands_see_earlier_effects() {
        let mut allocation = allocation(nodes(), ClusterSettings::default(), IndexSettings::new(1, 1));
        start(&mut allocation, 0, 0, 1);
        let deciders = AllocationDeciders::with_defaults(&AllocationLimits::new());

        let results = CommandExecutor::new(&deciders)
            .execute(&mut allocation, &[allocate_replica(2, false), allocate_replica(3, false)])
            .unwrap();

        assert!(results[0].is_applied());
        assert!(matches!(
            results[1].outcome,
            Err(CommandError::NoUnassignedCopy { .. })
        ));
        assert_eq!(
            allocation.routing(&copy(0, 1)).unwrap().current_node(),
            Some(NodeId::new(2))
        );
    }

    #[test]
    fn test_veto_unless_forced() {
        let mut allocation = allocation(nodes(), ClusterSettings::default(), IndexSettings::new(1, 1));
        start(&mut allocation, 0, 0, 1);
        let deciders = AllocationDeciders::with_defaults(&AllocationLimits::new());
        let executor = CommandExecutor::new(&deciders);

        let mut zoned = nodes();
        zoned.push(DiscoveryNode::new(NodeId::new(4)).with_attribute("zone", "b"));
        let mut limited = crate::decider::test_support::allocation(
            zoned,
            ClusterSettings::default(),
            IndexSettings::new(1, 1).with_filters(crate::metadata::AttributeFilters {
                exclude: [("zone".to_string(), vec!["b".to_string()])].into_iter().collect(),
                ..crate::metadata::AttributeFilters::default()
            }),
        );
        start(&mut limited, 0, 0, 1);
        let results = executor
            .execute(&mut limited, &[allocate_replica(4, false)])
            .unwrap();
        assert!(matches!(
            results[0].outcome,
            Err(CommandError::DeciderVeto { decider: "filter", .. })
        ));
        assert!(executor.execute(&mut limited, &[allocate_replica(4, true)]).unwrap()[0].is_applied());

        let mut forced = crate::decider::test_support::allocation(
            nodes(),
            ClusterSettings {
                allocation_enable: crate::metadata::AllocationEnable::None,
                ..ClusterSettings::default()
            },
            IndexSettings::new(1, 1),
        );
        start(&mut forced, 0, 0, 1);
        assert!(executor.execute(&mut forced, &[allocate_replica(2, false)]).unwrap()[0]
            .outcome
            .is_err());
        assert!(executor.execute(&mut forced, &[allocate_replica(2, true)]).unwrap()[0].is_applied());
    }

    #[test]
    fn test_forced_allocation_never_stacks_copies() {
        let mut allocation = allocation(nodes(), ClusterSettings::default(), IndexSettings::new(1, 1));
        start(&mut allocation, 0, 0, 1);
        let before = allocation.state().clone();
        let deciders = AllocationDeciders::with_defaults(&AllocationLimits::new());

        // Node 1 already holds the primary.
        for allow_force in [false, true] {
            let results = CommandExecutor::new(&deciders)
                .execute(&mut allocation, &[allocate_replica(1, allow_force)])
                .unwrap();
            assert_eq!(
                results[0].outcome,
                Err(CommandError::ShardAlreadyOnNode {
                    shard_id: ShardId::new("test", 0),
                    node: NodeId::new(1),
                })
            );
        }
        assert_eq!(allocation.state(), &before);
    }

    #[test]
    fn test_manual_allocation_clears_failures() {
        let mut allocation = allocation(nodes(), ClusterSettings::default(), IndexSettings::new(1, 1));
        start(&mut allocation, 0, 0, 1);
        allocation
            .initialize(&copy(0, 1), NodeId::new(2), AllocationCause::Automatic)
            .unwrap();
        allocation
            .fail_copy(&copy(0, 1), CopyFailure::failed_initialization("boom"))
            .unwrap();
        assert_eq!(allocation.failures().count(&copy(0, 1)), 1);

        let deciders = AllocationDeciders::with_defaults(&AllocationLimits::new());
        CommandExecutor::new(&deciders)
            .execute(&mut allocation, &[allocate_replica(3, false)])
            .unwrap();
        assert_eq!(allocation.failures().count(&copy(0, 1)), 0);
    }

    #[test]
    fn test_primary_allocation_requires_data_or_force() {
        let mut allocation = allocation(nodes(), ClusterSettings::default(), IndexSettings::new(1, 0));
        start(&mut allocation, 0, 0, 1);
        allocation
            .fail_copy(&copy(0, 0), CopyFailure::failed_active("corrupt"))
            .unwrap();
        let deciders = AllocationDeciders::with_defaults(&AllocationLimits::new());
        let executor = CommandExecutor::new(&deciders);

        let primary = |node: u64, allow_force: bool| AllocationCommand::AllocatePrimary {
            index: IndexName::new("test"),
            shard_number: 0,
            node_id: NodeId::new(node),
            allow_force,
        };
        let results = executor.execute(&mut allocation, &[primary(2, false)]).unwrap();
        assert!(matches!(
            results[0].outcome,
            Err(CommandError::DataLossNotAccepted { .. })
        ));

        let results = executor.execute(&mut allocation, &[primary(2, true)]).unwrap();
        assert!(results[0].is_applied());
    }

    #[test]
    fn test_cancel_and_move() {
        let mut allocation = allocation(nodes(), ClusterSettings::default(), IndexSettings::new(1, 1));
        start(&mut allocation, 0, 0, 1);
        start(&mut allocation, 0, 1, 2);
        let deciders = AllocationDeciders::with_defaults(&AllocationLimits::new());
        let executor = CommandExecutor::new(&deciders);

        let cancel_primary = AllocationCommand::Cancel {
            index: IndexName::new("test"),
            shard_number: 0,
            node_id: NodeId::new(1),
            allow_force: false,
        };
        let results = executor.execute(&mut allocation, &[cancel_primary]).unwrap();
        assert!(matches!(
            results[0].outcome,
            Err(CommandError::PrimaryCancelNotAllowed { .. })
        ));

        let move_replica = AllocationCommand::Move {
            index: IndexName::new("test"),
            shard_number: 0,
            from_node: NodeId::new(2),
            to_node: NodeId::new(3),
        };
        let results = executor.execute(&mut allocation, &[move_replica]).unwrap();
        assert!(results[0].is_applied());
        assert_eq!(allocation.routing(&copy(0, 1)).unwrap().state(), ShardState::Relocating);

        // Cancelling on the target abandons the move.
        let cancel_target = AllocationCommand::Cancel {
            index: IndexName::new("test"),
            shard_number: 0,
            node_id: NodeId::new(3),
            allow_force: false,
        };
        let results = executor.execute(&mut allocation, &[cancel_target]).unwrap();
        assert!(results[0].is_applied());
        let replica = allocation.routing(&copy(0, 1)).unwrap();
        assert_eq!(replica.state(), ShardState::Started);
        assert_eq!(replica.current_node(), Some(NodeId::new(2)));

        let cancel_replica = AllocationCommand::Cancel {
            index: IndexName::new("test"),
            shard_number: 0,
            node_id: NodeId::new(2),
            allow_force: false,
        };
        let results = executor.execute(&mut allocation, &[cancel_replica]).unwrap();
        assert!(results[0].is_applied());
        assert_eq!(
            allocation.unassigned().get(&copy(0, 1)).unwrap().reason,
            crate::unassigned::UnassignedReason::RerouteCancelled
        );
    }
}

//! Cairn Routing - shard allocation and rerouting.
//!
//! This crate decides which node hosts each copy of each shard. It reacts to
//! membership changes, recovery reports and operator commands, and produces
//! a new immutable [`ClusterState`] per round.
//!
//! # Design (`TigerStyle`)
//!
//! - **Pure rounds**: a round takes a snapshot and a clock reading and returns
//!   the next snapshot or an error; no I/O, no hidden time
//! - **Pluggable policy**: placement constraints are [`AllocationDecider`]s
//! - **Explicit limits**: retries, recoveries and delays are all bounded
//! - **Checked output**: every snapshot passes [`invariants::check`]

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod allocation;
mod command;
pub mod decider;
mod delay;
mod diff;
mod error;
mod health;
pub mod invariants;
mod metadata;
mod nodes;
mod retry;
mod routing_nodes;
mod routing_table;
mod service;
mod shard;
mod state;
mod unassigned;

pub use allocation::{CopyFailure, RoutingAllocation};
pub use command::{AllocationCommand, CommandExecutor, CommandResult};
pub use decider::{AllocationDecider, AllocationDeciders, Decision};
pub use delay::DelayScheduler;
pub use diff::{AllocationCause, RoutingChange, RoutingDiff};
pub use error::{CommandError, RoutingError, RoutingResult};
pub use health::{ClusterHealth, HealthStatus};
pub use metadata::{
    AllocationEnable, AttributeFilters, ClusterSettings, IndexMetadata, IndexSettings, Metadata,
    REPLICAS_MAX, SHARDS_PER_INDEX_MAX,
};
pub use nodes::{DiscoveryNode, DiscoveryNodes, DiskUsage};
pub use retry::{FailureLedger, FailureRecord, RetryController};
pub use routing_nodes::{NodeEntry, RoutingNodes};
pub use routing_table::RoutingTable;
pub use service::{AllocationService, RerouteOutcome, RerouteRequest};
pub use shard::{CopyId, ShardCopyRole, ShardRouting, ShardState};
pub use state::ClusterState;
pub use unassigned::{
    AllocationStatus, MarkUnassigned, UnassignedInfo, UnassignedReason, UnassignedRegistry,
};

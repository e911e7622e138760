//! Property definitions and checkers for cairn simulation tests.
//!
//! Properties are invariants that must hold after every round. The
//! structural ones come from `cairn_routing::invariants`; this module adds
//! the properties that only make sense across a sequence of snapshots.

use std::collections::BTreeSet;

use cairn_core::NodeId;
use cairn_routing::{invariants, AllocationStatus, ClusterState, RetryController, UnassignedReason};

// ============================================================================
// Property Violation Types
// ============================================================================

/// A violation of an allocation property.
#[derive(Debug, Clone)]
pub enum PropertyViolation {
    /// A structural invariant failed.
    Structural {
        /// Snapshot version.
        version: u64,
        /// The checker's message.
        detail: String,
    },
    /// Versions did not increase by exactly one.
    VersionGap {
        /// Previous version.
        previous: u64,
        /// Observed version.
        observed: u64,
    },
    /// A copy is placed on a node the simulation stopped.
    CopyOnStoppedNode {
        /// Snapshot version.
        version: u64,
        /// The stopped node.
        node: NodeId,
    },
    /// A delayed copy did not leave because of a node departure.
    DelayWithoutDeparture {
        /// Snapshot version.
        version: u64,
        /// The copy.
        copy: String,
    },
    /// An unassigned primary is held back by the node-left delay.
    DelayedPrimary {
        /// Snapshot version.
        version: u64,
        /// The copy.
        copy: String,
    },
    /// A copy reports exhausted retries below its limit.
    PrematureRetryBlock {
        /// Snapshot version.
        version: u64,
        /// The copy.
        copy: String,
        /// Recorded failures.
        failures: u32,
    },
    /// The health signal disagrees with the registry.
    DelayedCountMismatch {
        /// Snapshot version.
        version: u64,
        /// Delayed copies in the registry.
        registry: usize,
        /// Delayed copies according to the health summary.
        health: usize,
    },
}

impl std::fmt::Display for PropertyViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Structural { version, detail } => write!(f, "v{version}: {detail}"),
            Self::VersionGap { previous, observed } => {
                write!(f, "version jumped from {previous} to {observed}")
            }
            Self::CopyOnStoppedNode { version, node } => {
                write!(f, "v{version}: copy placed on stopped {node}")
            }
            Self::DelayWithoutDeparture { version, copy } => {
                write!(f, "v{version}: {copy} delayed without a node departure")
            }
            Self::DelayedPrimary { version, copy } => {
                write!(f, "v{version}: primary {copy} is delayed")
            }
            Self::PrematureRetryBlock {
                version,
                copy,
                failures,
            } => write!(f, "v{version}: {copy} blocked after only {failures} failures"),
            Self::DelayedCountMismatch {
                version,
                registry,
                health,
            } => write!(
                f,
                "v{version}: {registry} delayed copies in the registry, health reports {health}"
            ),
        }
    }
}

// ============================================================================
// Property Checker
// ============================================================================

/// Tracks snapshots across a simulation for property verification.
#[derive(Debug, Default)]
pub struct PropertyChecker {
    /// Version of the last recorded snapshot.
    last_version: Option<u64>,
    /// Snapshots checked so far.
    snapshots_checked: u64,
    /// Violations found.
    violations: Vec<PropertyViolation>,
}

impl PropertyChecker {
    /// Creates a new property checker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks a freshly published snapshot.
    ///
    /// `stopped` lists nodes the simulation has taken down; no copy may
    /// remain on them.
    pub fn record(&mut self, state: &ClusterState, stopped: &BTreeSet<NodeId>) {
        self.snapshots_checked += 1;
        let version = state.version();

        if let Err(err) = invariants::check(state) {
            self.violations.push(PropertyViolation::Structural {
                version,
                detail: err.to_string(),
            });
        }

        if let Some(previous) = self.last_version {
            if version != previous + 1 {
                self.violations.push(PropertyViolation::VersionGap {
                    previous,
                    observed: version,
                });
            }
        }
        self.last_version = Some(version);

        for routing in state.routing_table().iter() {
            for node in routing.occupied_nodes() {
                if stopped.contains(&node) {
                    self.violations
                        .push(PropertyViolation::CopyOnStoppedNode { version, node });
                }
            }
        }

        for (copy, info) in state.unassigned().iter() {
            if info.delayed && info.reason != UnassignedReason::NodeLeft {
                self.violations.push(PropertyViolation::DelayWithoutDeparture {
                    version,
                    copy: copy.to_string(),
                });
            }
            if info.delayed && state.routing(copy).is_some_and(|routing| routing.is_primary()) {
                self.violations.push(PropertyViolation::DelayedPrimary {
                    version,
                    copy: copy.to_string(),
                });
            }
            if info.status == AllocationStatus::RetriesExhausted {
                let limit = state
                    .metadata()
                    .settings_for(&copy.shard_id)
                    .map_or(0, |settings| RetryController::for_index(settings).max_retries());
                let failures = state.failures().count(copy);
                if failures < limit {
                    self.violations.push(PropertyViolation::PrematureRetryBlock {
                        version,
                        copy: copy.to_string(),
                        failures,
                    });
                }
            }
        }

        let health = cairn_routing::ClusterHealth::from_state(state);
        let registry = state.unassigned().delayed_count();
        if health.delayed_unassigned_shards != registry {
            self.violations.push(PropertyViolation::DelayedCountMismatch {
                version,
                registry,
                health: health.delayed_unassigned_shards,
            });
        }
    }

    /// Returns all violations found.
    #[must_use]
    pub fn violations(&self) -> &[PropertyViolation] {
        &self.violations
    }

    /// Returns the number of snapshots checked.
    #[must_use]
    pub const fn snapshots_checked(&self) -> u64 {
        self.snapshots_checked
    }

    /// Panics with every violation if any were found.
    ///
    /// # Panics
    ///
    /// Panics if a property was violated.
    pub fn assert_ok(&self, context: &str) {
        assert!(
            self.violations.is_empty(),
            "{context}: {} violations after {} snapshots:\n{}",
            self.violations.len(),
            self.snapshots_checked,
            self.violations
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("\n")
        );
    }
}

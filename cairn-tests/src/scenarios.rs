//! Reusable test scenarios for cairn simulation.
//!
//! Scenarios define cluster shapes, index layouts and event mixes that can
//! be composed into end-to-end and randomized tests.

/// Standard cluster sizes.
pub mod clusters {
    /// Two nodes: room for one primary and one replica per shard.
    pub const TWO_NODE: u64 = 2;

    /// Three nodes: one spare after a single departure.
    pub const THREE_NODE: u64 = 3;

    /// Five nodes for randomized runs.
    pub const FIVE_NODE: u64 = 5;
}

/// Node-left delay settings, in microseconds.
pub mod delays {
    use cairn_core::US_PER_SEC;

    /// Reallocate as soon as the node leaves.
    pub const NONE: u64 = 0;

    /// One minute.
    pub const MINUTE: u64 = 60 * US_PER_SEC;

    /// One hour.
    pub const HOUR: u64 = 3_600 * US_PER_SEC;
}

/// Events for randomized runs.
pub mod events {
    use cairn_core::{IndexName, NodeId};
    use cairn_routing::AllocationCommand;
    use rand::Rng;

    /// One step of a randomized run.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Event {
        /// Stop a running node.
        StopNode(NodeId),
        /// Restart a stopped node on its data location.
        RestartNode(NodeId),
        /// Report one recovering copy as started.
        StartOne,
        /// Report every recovering copy as started.
        StartAll,
        /// Fail one assigned copy.
        FailOne,
        /// Let time pass.
        Advance(u64),
        /// Explicit reroute, optionally with `retry_failed`.
        Reroute {
            /// Reset failure counters this round.
            retry_failed: bool,
        },
        /// Change the replica count of the test index.
        SetReplicas(u32),
        /// Submit one operator command.
        Command(CommandEvent),
    }

    /// An operator command against the test index.
    ///
    /// Shard numbers are reduced modulo the index's shard count when the
    /// command is built. Node ids may name a stopped node or one that never
    /// joined.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum CommandEvent {
        /// `allocate-replica`.
        AllocateReplica {
            /// Shard number before reduction.
            shard: u32,
            /// Target node.
            node: NodeId,
            /// Skip the deciders.
            allow_force: bool,
        },
        /// `allocate-primary`.
        AllocatePrimary {
            /// Shard number before reduction.
            shard: u32,
            /// Target node.
            node: NodeId,
            /// Skip the deciders and accept data loss.
            allow_force: bool,
        },
        /// `cancel`.
        Cancel {
            /// Shard number before reduction.
            shard: u32,
            /// Node hosting the copy.
            node: NodeId,
            /// Allow cancelling a primary.
            allow_force: bool,
        },
        /// `move`.
        Move {
            /// Shard number before reduction.
            shard: u32,
            /// Current host.
            from: NodeId,
            /// Destination.
            to: NodeId,
        },
    }

    impl CommandEvent {
        /// Builds the command for `index`.
        #[must_use]
        pub fn to_command(self, index: &str, number_of_shards: u32) -> AllocationCommand {
            let index = IndexName::new(index);
            let reduce = |shard: u32| shard % number_of_shards.max(1);
            match self {
                Self::AllocateReplica {
                    shard,
                    node,
                    allow_force,
                } => AllocationCommand::AllocateReplica {
                    index,
                    shard_number: reduce(shard),
                    node_id: node,
                    allow_force,
                },
                Self::AllocatePrimary {
                    shard,
                    node,
                    allow_force,
                } => AllocationCommand::AllocatePrimary {
                    index,
                    shard_number: reduce(shard),
                    node_id: node,
                    allow_force,
                },
                Self::Cancel {
                    shard,
                    node,
                    allow_force,
                } => AllocationCommand::Cancel {
                    index,
                    shard_number: reduce(shard),
                    node_id: node,
                    allow_force,
                },
                Self::Move { shard, from, to } => AllocationCommand::Move {
                    index,
                    shard_number: reduce(shard),
                    from_node: from,
                    to_node: to,
                },
            }
        }
    }

    /// Draws an event. Node ids are drawn from `1..=nodes`; commands may
    /// also target `nodes + 1`, which never joins.
    pub fn random_event<R: Rng>(rng: &mut R, nodes: u64, max_delay_us: u64) -> Event {
        match rng.gen_range(0..100) {
            0..=10 => Event::StopNode(NodeId::new(rng.gen_range(1..=nodes))),
            11..=21 => Event::RestartNode(NodeId::new(rng.gen_range(1..=nodes))),
            22..=39 => Event::StartOne,
            40..=48 => Event::StartAll,
            49..=60 => Event::FailOne,
            61..=72 => Event::Advance(rng.gen_range(0..=max_delay_us)),
            73..=82 => Event::Reroute {
                retry_failed: rng.gen_bool(0.3),
            },
            83..=94 => Event::Command(random_command(rng, nodes)),
            _ => Event::SetReplicas(rng.gen_range(0..=2)),
        }
    }

    fn random_command<R: Rng>(rng: &mut R, nodes: u64) -> CommandEvent {
        let shard = rng.gen_range(0..4);
        let node = NodeId::new(rng.gen_range(1..=nodes + 1));
        let allow_force = rng.gen_bool(0.5);
        match rng.gen_range(0..4) {
            0 => CommandEvent::AllocateReplica {
                shard,
                node,
                allow_force,
            },
            1 => CommandEvent::AllocatePrimary {
                shard,
                node,
                allow_force,
            },
            2 => CommandEvent::Cancel {
                shard,
                node,
                allow_force,
            },
            _ => CommandEvent::Move {
                shard,
                from: node,
                to: NodeId::new(rng.gen_range(1..=nodes + 1)),
            },
        }
    }
}

/// Seeds for reproducible testing.
pub mod seeds {
    /// Standard test seeds that have historically found bugs.
    pub const REGRESSION_SEEDS: &[u64] = &[
        42,
        12345,
        0xDEAD_BEEF,
        999,
        7777,
        0x1337,
        0xCAFE_BABE,
        1,
        u64::MAX,
        0,
    ];

    /// Number of random seeds to test in CI.
    pub const CI_SEED_COUNT: u32 = 100;
}

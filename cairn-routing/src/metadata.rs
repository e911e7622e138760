//! Index and cluster settings consumed by the allocation engine.

use std::collections::{BTreeMap, BTreeSet};

use cairn_core::{AllocationLimits, Error, IndexName, ShardId};
use im::OrdMap;
use serde::{Deserialize, Serialize};

/// Maximum shards per index.
pub const SHARDS_PER_INDEX_MAX: u32 = 1_024;

/// Maximum replicas per shard.
pub const REPLICAS_MAX: u32 = 32;

/// Which copies may be allocated at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationEnable {
    /// Every copy.
    #[default]
    All,
    /// Primaries only.
    Primaries,
    /// Primaries of newly created indices only.
    NewPrimaries,
    /// Nothing.
    None,
}

/// Node attribute constraints, keyed by attribute name.
///
/// `_id` and `_name` match the node's id and name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttributeFilters {
    /// Every listed attribute must match one of its values.
    pub require: BTreeMap<String, Vec<String>>,
    /// At least one listed attribute must match one of its values.
    pub include: BTreeMap<String, Vec<String>>,
    /// No listed attribute may match any of its values.
    pub exclude: BTreeMap<String, Vec<String>>,
}

impl AttributeFilters {
    /// Returns true if no constraint is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.require.is_empty() && self.include.is_empty() && self.exclude.is_empty()
    }
}

/// Per-index settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IndexSettings {
    /// Number of shards.
    pub number_of_shards: u32,
    /// Replicas per shard.
    pub number_of_replicas: u32,
    /// How long copies of a departed node are withheld from reallocation
    /// (microseconds). Zero disables the delay.
    pub node_left_delay_us: u64,
    /// Consecutive failed initializations before automatic retries stop.
    pub max_retries: u32,
    /// Index-level allocation switch. Falls back to the cluster setting.
    pub allocation_enable: Option<AllocationEnable>,
    /// Attribute filters.
    pub filters: AttributeFilters,
}

impl IndexSettings {
    /// Creates settings with the given layout and default policies.
    #[must_use]
    pub fn new(number_of_shards: u32, number_of_replicas: u32) -> Self {
        Self {
            number_of_shards,
            number_of_replicas,
            ..Self::default()
        }
    }

    /// Sets the node-left delay.
    #[must_use]
    pub const fn with_node_left_delay_us(mut self, delay_us: u64) -> Self {
        self.node_left_delay_us = delay_us;
        self
    }

    /// Sets the retry limit.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the index-level allocation switch.
    #[must_use]
    pub const fn with_allocation_enable(mut self, enable: AllocationEnable) -> Self {
        self.allocation_enable = Some(enable);
        self
    }

    /// Sets attribute filters.
    #[must_use]
    pub fn with_filters(mut self, filters: AttributeFilters) -> Self {
        self.filters = filters;
        self
    }

    /// Copies per shard (primary plus replicas).
    #[must_use]
    pub const fn copies_per_shard(&self) -> u32 {
        1 + self.number_of_replicas
    }

    /// Validates the settings.
    ///
    /// # Errors
    /// Returns an error if the layout or retry limit is out of range.
    pub fn validate(&self) -> cairn_core::Result<()> {
        if self.number_of_shards == 0 {
            return Err(Error::InvalidArgument {
                name: "number_of_shards",
                reason: "must be positive",
            });
        }
        if self.number_of_shards > SHARDS_PER_INDEX_MAX {
            return Err(Error::LimitExceeded {
                limit: "number_of_shards",
                max: u64::from(SHARDS_PER_INDEX_MAX),
                actual: u64::from(self.number_of_shards),
            });
        }
        if self.number_of_replicas > REPLICAS_MAX {
            return Err(Error::LimitExceeded {
                limit: "number_of_replicas",
                max: u64::from(REPLICAS_MAX),
                actual: u64::from(self.number_of_replicas),
            });
        }
        if self.max_retries == 0 {
            return Err(Error::InvalidArgument {
                name: "max_retries",
                reason: "must be positive",
            });
        }
        Ok(())
    }
}

impl Default for IndexSettings {
    fn default() -> Self {
        let limits = AllocationLimits::new();
        Self {
            number_of_shards: 1,
            number_of_replicas: 1,
            node_left_delay_us: limits.default_node_left_delay_us,
            max_retries: limits.max_retries,
            allocation_enable: None,
            filters: AttributeFilters::default(),
        }
    }
}

/// An index and its settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMetadata {
    /// Index name.
    pub name: IndexName,
    /// Settings.
    pub settings: IndexSettings,
    /// Shard numbers whose primary has been active at least once. Such a
    /// shard has data that a fresh empty primary would lose.
    #[serde(default)]
    pub activated_shards: BTreeSet<u32>,
}

impl IndexMetadata {
    /// Creates metadata for a new index.
    #[must_use]
    pub fn new(name: impl Into<IndexName>, settings: IndexSettings) -> Self {
        Self {
            name: name.into(),
            settings,
            activated_shards: BTreeSet::new(),
        }
    }
}

/// Cluster-wide allocation settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClusterSettings {
    /// Node attributes copies of a shard are spread across (e.g. `zone`).
    pub awareness_attributes: Vec<String>,
    /// Cluster-level allocation switch.
    pub allocation_enable: AllocationEnable,
}

/// Cluster metadata: settings plus every index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    cluster: ClusterSettings,
    indices: OrdMap<IndexName, IndexMetadata>,
}

impl Metadata {
    /// Creates metadata with the given cluster settings and no indices.
    #[must_use]
    pub fn new(cluster: ClusterSettings) -> Self {
        Self {
            cluster,
            indices: OrdMap::new(),
        }
    }

    /// Returns cluster-wide settings.
    #[must_use]
    pub const fn cluster(&self) -> &ClusterSettings {
        &self.cluster
    }

    /// Replaces the cluster-wide settings.
    pub fn set_cluster(&mut self, cluster: ClusterSettings) {
        self.cluster = cluster;
    }

    /// Returns an index.
    #[must_use]
    pub fn index(&self, name: &IndexName) -> Option<&IndexMetadata> {
        self.indices.get(name)
    }

    /// Returns the settings of the index owning `shard_id`.
    #[must_use]
    pub fn settings_for(&self, shard_id: &ShardId) -> Option<&IndexSettings> {
        self.indices.get(&shard_id.index).map(|index| &index.settings)
    }

    /// Adds or replaces an index.
    pub fn put_index(&mut self, index: IndexMetadata) {
        self.indices.insert(index.name.clone(), index);
    }

    /// Removes an index.
    pub fn remove_index(&mut self, name: &IndexName) -> Option<IndexMetadata> {
        self.indices.remove(name)
    }

    /// Iterates over indices in name order.
    pub fn indices(&self) -> impl Iterator<Item = &IndexMetadata> {
        self.indices.values()
    }

    /// Returns true if the shard's primary has ever been active.
    #[must_use]
    pub fn is_activated(&self, shard_id: &ShardId) -> bool {
        self.indices
            .get(&shard_id.index)
            .is_some_and(|index| index.activated_shards.contains(&shard_id.shard))
    }

    /// Records that the shard's primary became active.
    pub fn mark_activated(&mut self, shard_id: &ShardId) {
        if let Some(index) = self.indices.get_mut(&shard_id.index) {
            index.activated_shards.insert(shard_id.shard);
        }
    }

    /// Effective allocation switch for an index.
    #[must_use]
    pub fn allocation_enable(&self, shard_id: &ShardId) -> AllocationEnable {
        self.settings_for(shard_id)
            .and_then(|settings| settings.allocation_enable)
            .unwrap_or(self.cluster.allocation_enable)
    }
}

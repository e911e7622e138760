//! Strongly-typed identifiers for cairn entities.
//!
//! Explicit types prevent bugs from mixing up a node with a shard number.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Macro to generate strongly-typed ID wrappers.
///
/// Each ID type wraps a u64 and provides:
/// - Type safety (can't mix `NodeId` with a shard number)
/// - Debug/Display formatting
/// - Transparent serde representation
macro_rules! define_id {
    ($name:ident, $prefix:expr, $doc:expr) => {
        #[doc = $doc]
        #[derive(
            Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        #[repr(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Creates a new ID from a raw u64 value.
            #[inline]
            #[must_use]
            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            /// Returns the raw u64 value.
            #[inline]
            #[must_use]
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", $prefix, self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}-{}", $prefix, self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self::new(value)
            }
        }
    };
}

// A node id names a data location: a node restarted on the same data
// directory comes back with the same id.
define_id!(NodeId, "node", "Persistent identifier for a data node in the cluster.");

/// Name of an index. Cheap to clone; used inside every `ShardId`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IndexName(Arc<str>);

impl IndexName {
    /// Creates an index name.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self(Arc::from(name))
    }

    /// Returns the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for IndexName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}

impl fmt::Display for IndexName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IndexName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Identifies a shard: an index plus a shard number within it.
///
/// Value-typed and ordered, so it can key ordered maps and give the
/// allocator a stable iteration order.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ShardId {
    /// The owning index.
    pub index: IndexName,
    /// Shard number, `0..number_of_shards`.
    pub shard: u32,
}

impl ShardId {
    /// Creates a shard identifier.
    #[must_use]
    pub fn new(index: impl Into<IndexName>, shard: u32) -> Self {
        Self {
            index: index.into(),
            shard,
        }
    }
}

impl fmt::Debug for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}][{}]", self.index, self.shard)
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}][{}]", self.index, self.shard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_display() {
        let node = NodeId::new(42);
        assert_eq!(format!("{node}"), "node-42");
        assert_eq!(format!("{node:?}"), "node(42)");
    }

    #[test]
    fn test_shard_id_ordering() {
        let a = ShardId::new("logs", 0);
        let b = ShardId::new("logs", 1);
        let c = ShardId::new("metrics", 0);

        assert!(a < b);
        assert!(b < c);
        assert_eq!(a, ShardId::new("logs", 0));
        assert_eq!(a.to_string(), "[logs][0]");
    }

    #[test]
    fn test_serde_is_transparent() {
        let node: NodeId = serde_json::from_str("7").unwrap();
        assert_eq!(node, NodeId::new(7));

        let index: IndexName = serde_json::from_str("\"test\"").unwrap();
        assert_eq!(index.as_str(), "test");
    }
}

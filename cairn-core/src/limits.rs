//! Allocation limits and configuration bounds.
//!
//! Every knob the allocation engine consults has an explicit default and an
//! explicit maximum. This keeps recovery I/O and retry loops bounded.

/// Microseconds per second, for building `_us` durations.
pub const US_PER_SEC: u64 = 1_000_000;

/// Upper bound on `max_retries` for any index.
const MAX_RETRIES_CEILING: u32 = 1_000;

/// Upper bound on per-node concurrent recoveries.
const CONCURRENT_RECOVERIES_CEILING: u32 = 1_024;

/// Cluster-wide limits for the allocation engine.
///
/// Default values mirror a conservative production deployment. Per-index
/// settings may override `max_retries` and the node-left delay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AllocationLimits {
    // Retry limits.
    /// Consecutive failed initializations before a copy stops being retried.
    pub max_retries: u32,

    // Recovery throttling.
    /// Maximum in-flight incoming replica recoveries per node.
    pub node_concurrent_recoveries: u32,
    /// Maximum in-flight initial primary recoveries per node.
    pub node_initial_primaries_recoveries: u32,

    // Disk watermarks, as used fractions of total capacity.
    /// Above this, no new replicas or relocations are placed on the node.
    pub disk_low_watermark: f64,
    /// Above this, nothing new is placed on the node.
    pub disk_high_watermark: f64,

    // Delayed allocation.
    /// Default node-left delay in microseconds when an index sets none.
    pub default_node_left_delay_us: u64,
}

impl AllocationLimits {
    /// Creates limits with safe defaults.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_retries: 5,

            node_concurrent_recoveries: 2,
            node_initial_primaries_recoveries: 4,

            disk_low_watermark: 0.85,
            disk_high_watermark: 0.90,

            // One minute.
            default_node_left_delay_us: 60 * US_PER_SEC,
        }
    }

    /// Validates that all limits are internally consistent.
    ///
    /// # Errors
    /// Returns an error if any limit is zero, out of range, or inconsistent.
    pub fn validate(&self) -> crate::Result<()> {
        if self.max_retries == 0 {
            return Err(crate::Error::InvalidArgument {
                name: "max_retries",
                reason: "must be positive",
            });
        }
        if self.max_retries > MAX_RETRIES_CEILING {
            return Err(crate::Error::LimitExceeded {
                limit: "max_retries",
                max: u64::from(MAX_RETRIES_CEILING),
                actual: u64::from(self.max_retries),
            });
        }

        if self.node_concurrent_recoveries == 0 || self.node_initial_primaries_recoveries == 0 {
            return Err(crate::Error::InvalidArgument {
                name: "node_concurrent_recoveries",
                reason: "must be positive",
            });
        }
        if self.node_concurrent_recoveries > CONCURRENT_RECOVERIES_CEILING {
            return Err(crate::Error::LimitExceeded {
                limit: "node_concurrent_recoveries",
                max: u64::from(CONCURRENT_RECOVERIES_CEILING),
                actual: u64::from(self.node_concurrent_recoveries),
            });
        }

        if !(0.0..=1.0).contains(&self.disk_low_watermark)
            || !(0.0..=1.0).contains(&self.disk_high_watermark)
        {
            return Err(crate::Error::InvalidArgument {
                name: "disk_watermark",
                reason: "must be within [0.0, 1.0]",
            });
        }
        if self.disk_low_watermark > self.disk_high_watermark {
            return Err(crate::Error::InvalidArgument {
                name: "disk_low_watermark",
                reason: "must be <= disk_high_watermark",
            });
        }

        Ok(())
    }
}

impl Default for AllocationLimits {
    fn default() -> Self {
        Self::new()
    }
}

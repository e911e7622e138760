//! Service configuration.

use cairn_core::AllocationLimits;

/// Upper bound on the command channel size.
const CHANNEL_BUFFER_CEILING: usize = 1 << 16;

/// Configuration for the cluster actor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServiceConfig {
    /// Command and output channel buffer size.
    pub channel_buffer_size: usize,
    /// Limits handed to the allocation engine.
    pub limits: AllocationLimits,
}

impl ServiceConfig {
    /// Creates a config with default limits.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            channel_buffer_size: 1000,
            limits: AllocationLimits::new(),
        }
    }

    /// Sets the allocation limits.
    #[must_use]
    pub const fn with_limits(mut self, limits: AllocationLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Validates the config.
    ///
    /// # Errors
    /// Returns an error if the buffer size is out of range or the limits do
    /// not validate.
    pub fn validate(&self) -> cairn_core::Result<()> {
        if self.channel_buffer_size == 0 {
            return Err(cairn_core::Error::InvalidArgument {
                name: "channel_buffer_size",
                reason: "must be positive",
            });
        }
        if self.channel_buffer_size > CHANNEL_BUFFER_CEILING {
            return Err(cairn_core::Error::LimitExceeded {
                limit: "channel_buffer_size",
                max: CHANNEL_BUFFER_CEILING as u64,
                actual: self.channel_buffer_size as u64,
            });
        }
        self.limits.validate()
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::new()
    }
}

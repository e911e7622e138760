//! Error types for cairn core operations.
//!
//! All errors must be handled explicitly. No silent failures.

use thiserror::Error;

/// The result type for cairn core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while validating identifiers, settings and limits.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// An invalid argument was provided.
    #[error("invalid argument '{name}': {reason}")]
    InvalidArgument {
        /// The name of the argument.
        name: &'static str,
        /// Why it was invalid.
        reason: &'static str,
    },

    /// A resource limit was exceeded.
    #[error("limit exceeded: {limit} (max={max}, actual={actual})")]
    LimitExceeded {
        /// Which limit was exceeded.
        limit: &'static str,
        /// The maximum allowed value.
        max: u64,
        /// The actual value that exceeded the limit.
        actual: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_argument_display() {
        let err = Error::InvalidArgument {
            name: "max_retries",
            reason: "must be positive",
        };
        assert_eq!(err.to_string(), "invalid argument 'max_retries': must be positive");
    }

    #[test]
    fn test_limit_exceeded_display() {
        let err = Error::LimitExceeded {
            limit: "number_of_shards",
            max: 1024,
            actual: 2048,
        };
        let msg = err.to_string();
        assert!(msg.contains("number_of_shards"));
        assert!(msg.contains("1024"));
        assert!(msg.contains("2048"));
    }
}

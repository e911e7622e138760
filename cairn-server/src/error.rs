//! Service error types.

use cairn_routing::RoutingError;

/// Service error type.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// The cluster actor is no longer running.
    #[error("cluster actor has shut down")]
    ActorShutdown,

    /// The service configuration is invalid.
    #[error("invalid service config: {0}")]
    InvalidConfig(#[from] cairn_core::Error),

    /// A reroute round was rejected; the previous snapshot stays current.
    #[error(transparent)]
    Routing(#[from] RoutingError),
}

/// Result type for service operations.
pub type ServiceResult<T> = Result<T, ServiceError>;

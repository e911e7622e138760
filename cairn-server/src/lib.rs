//! Cairn cluster service.
//!
//! Rerouting must be serialized: exactly one round computes the next
//! snapshot at a time. This crate owns the current [`ClusterState`] inside a
//! single actor task and feeds it membership changes, shard reports and
//! operator requests in arrival order.
//!
//! [`ClusterState`]: cairn_routing::ClusterState

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod clock;
mod config;
mod error;
mod service;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::ServiceConfig;
pub use error::{ServiceError, ServiceResult};
pub use service::{spawn_cluster_actor, ClusterActorHandle, ClusterCommand, RerouteResponse, ServiceOutput};

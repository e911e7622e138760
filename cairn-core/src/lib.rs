//! Cairn Core - Strongly-typed identifiers and allocation limits.
//!
//! This crate provides the vocabulary shared by every cairn crate: node and
//! shard identifiers, the core error type, and the cluster-wide limits that
//! bound the allocation engine.
//!
//! # Design Principles
//!
//! - **Strongly-typed IDs**: A `NodeId` can never be confused with a shard number
//! - **Explicit limits**: Retries, recoveries and watermarks have bounded defaults
//! - **Explicit time**: All durations are `u64` microseconds, injected by callers
//! - **No unsafe code**

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod limits;
mod types;

pub use error::{Error, Result};
pub use limits::{AllocationLimits, US_PER_SEC};
pub use types::{IndexName, NodeId, ShardId};

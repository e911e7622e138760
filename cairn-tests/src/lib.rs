//! Cairn Tests - simulation and scenario tests for cairn.
//!
//! This crate contains the multi-round tests for the allocation engine and
//! the cluster actor. Tests are organized by type:
//!
//! **Simulation Tests** (`*_dst.rs`): seeded randomized event sequences
//! - `allocation_dst`: membership churn, failures and reroutes with property checks
//!
//! **Integration Tests** (`*_tests.rs`): end-to-end scenarios
//! - `scenario_tests`: retry-failed with a bad command, delayed allocation, reattachment
//! - `service_tests`: the cluster actor driven through its handle
//!
//! **Support Modules**:
//! - `simulated_cluster`: a cluster with persistent data locations and instant recovery
//! - `properties`: property checker run after every round
//! - `scenarios`: cluster sizes, delays, random events and seeds
//!
//! ## Naming Conventions
//!
//! - DST tests: `test_dst_<component>_<scenario>`
//! - Integration tests: `test_<component>_<scenario>`
//! - Unit tests: Inline in each crate under `#[cfg(test)]`

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod properties;
pub mod scenarios;
pub mod simulated_cluster;

// DST test modules (seeded randomized sequences).
#[cfg(test)]
mod allocation_dst;

// Integration test modules (multi-component tests).
#[cfg(test)]
mod scenario_tests;
#[cfg(test)]
mod service_tests;

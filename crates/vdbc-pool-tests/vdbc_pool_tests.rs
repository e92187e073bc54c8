//! VDBC Pool Testing Suite
//!
//! End-to-end tests for the keyed client pool, driven through its public API
//! against an in-process fake vector-database client factory.
//!
//! # Test Categories
//!
//! - Capacity (per-key and global caps under concurrent load, no double issue)
//! - Scenarios (warm-up, borrow/return cycles, timeouts, key isolation, tenants)
//! - Lifecycle (clear, close, eviction, guards)
//!
//! # Usage
//!
//! ```bash
//! cargo test -p vdbc-pool-tests
//!
//! # Verbose pool logging
//! RUST_LOG=vdbc_pool=debug cargo test -p vdbc-pool-tests -- --nocapture
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// Core infrastructure
pub mod fixtures;

#[cfg(test)]
pub mod capacity_tests;

#[cfg(test)]
pub mod lifecycle_tests;

#[cfg(test)]
pub mod scenario_tests;

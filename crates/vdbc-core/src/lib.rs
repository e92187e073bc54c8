//! VDBC Core - Shared abstractions for vector-database client pooling
//!
//! This crate provides the types the pool and its embedders agree on:
//!
//! - `ClientFactory` - Trait the embedding application implements to create and
//!   close remote-service clients
//! - `ConnectConfig` - Connection parameters for one logical database/tenant
//! - `PoolError` - Error taxonomy for pool operations

mod config;
mod error;
mod factory;

pub use config::*;
pub use error::*;
pub use factory::*;

//! VDBC Pool - Keyed pooling of remote vector-database clients
//!
//! This crate handles client lifecycle, per-key pooling, idle eviction and
//! caller-side retry for clients built by a [`ClientFactory`].

pub mod pool;
pub mod retry;

pub use pool::{ClientGuard, KeyStats, KeyedConnectionPool, PoolConfig, PoolStats, PooledClient};
pub use retry::{BackoffStrategy, RetryEvent, RetryPolicy};
pub use vdbc_core::{BoxError, ClientFactory, ConnectConfig, PoolError, Result, TlsConfig};

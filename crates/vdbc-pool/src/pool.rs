//! Keyed client pooling
//!
//! This module provides a pool of remote-service clients partitioned by key,
//! with per-key and global capacity limits, blocking borrow with timeout,
//! idle trimming on return, and background eviction.
//!
//! # Example
//!
//! ```ignore
//! use vdbc_pool::pool::{KeyedConnectionPool, PoolConfig};
//!
//! let config = PoolConfig::new(1, 5, 10)
//!     .with_max_total(100)
//!     .with_max_block_wait(Duration::from_secs(2));
//!
//! let pool = KeyedConnectionPool::new(config, ConnectConfig::default(), factory)?;
//! pool.config_for_key("tenant_b", ConnectConfig::default().with_database("tenant_b"))?;
//!
//! let client = pool.get_client("tenant_b").await?;
//! // Use client...
//! pool.return_client("tenant_b", client).await;
//! ```

mod config;
mod evictor;
mod keyed;
mod lease;
mod shared;
mod stats;
mod sub_pool;


pub use config::PoolConfig;
pub use keyed::KeyedConnectionPool;
pub use lease::{ClientGuard, PooledClient};
pub use stats::{KeyStats, PoolStats, ThroughputMeter};
pub use sub_pool::SubPool;

//! Retry helpers for callers of the pool
//!
//! A borrow that times out is recoverable. This module provides the backoff and
//! policy types callers use to retry it.
//!
//! # Example
//!
//! ```ignore
//! use vdbc_pool::retry::{BackoffStrategy, RetryPolicy};
//!
//! let policy = RetryPolicy::new(3, BackoffStrategy::new(50, 1_000).with_jitter(true));
//! let client = pool.get_client_with_retry("tenant_a", &policy).await?;
//! ```

mod backoff;
mod policy;


pub use backoff::BackoffStrategy;
pub use policy::{RetryEvent, RetryPolicy};

//! Pool configuration types

use std::time::Duration;

use serde::{Deserialize, Serialize};
use vdbc_core::{PoolError, Result, ceil_millis};

/// Configuration for a keyed client pool
///
/// Sizing limits apply to every key unless noted otherwise; `max_total` caps
/// all keys combined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Minimum idle clients a key tries to keep
    min_idle_per_key: usize,
    /// Maximum idle clients retained per key
    max_idle_per_key: usize,
    /// Maximum clients (idle + active) per key
    max_total_per_key: usize,
    /// Maximum clients across all keys
    max_total: usize,
    /// How long a borrow waits for a client, in milliseconds
    max_block_wait_ms: u64,
    /// How long a client must sit idle before eviction may reap it, in milliseconds
    min_evictable_idle_ms: u64,
    /// Interval between background eviction runs in milliseconds (0 disables)
    time_between_eviction_runs_ms: u64,
    /// Validate idle clients before handing them out
    test_on_borrow: bool,
    /// Validate clients when they are returned
    test_on_return: bool,
}

impl PoolConfig {
    /// Create a pool configuration with the given per-key sizing
    pub fn new(min_idle_per_key: usize, max_idle_per_key: usize, max_total_per_key: usize) -> Self {
        Self {
            min_idle_per_key,
            max_idle_per_key,
            max_total_per_key,
            ..Self::default()
        }
    }

    pub fn with_min_idle_per_key(mut self, min_idle: usize) -> Self {
        self.min_idle_per_key = min_idle;
        self
    }

    pub fn with_max_idle_per_key(mut self, max_idle: usize) -> Self {
        self.max_idle_per_key = max_idle;
        self
    }

    pub fn with_max_total_per_key(mut self, max_total: usize) -> Self {
        self.max_total_per_key = max_total;
        self
    }

    /// Set the global cap across all keys
    pub fn with_max_total(mut self, max_total: usize) -> Self {
        self.max_total = max_total;
        self
    }

    /// Set how long `get_client` blocks waiting for capacity
    pub fn with_max_block_wait(mut self, wait: Duration) -> Self {
        self.max_block_wait_ms = ceil_millis(wait);
        self
    }

    /// Set the minimum idle time before a client becomes evictable
    pub fn with_min_evictable_idle(mut self, idle: Duration) -> Self {
        self.min_evictable_idle_ms = ceil_millis(idle);
        self
    }

    /// Set the background eviction interval; `Duration::ZERO` disables it
    pub fn with_time_between_eviction_runs(mut self, interval: Duration) -> Self {
        self.time_between_eviction_runs_ms = ceil_millis(interval);
        self
    }

    pub fn with_test_on_borrow(mut self, test: bool) -> Self {
        self.test_on_borrow = test;
        self
    }

    pub fn with_test_on_return(mut self, test: bool) -> Self {
        self.test_on_return = test;
        self
    }

    pub fn min_idle_per_key(&self) -> usize {
        self.min_idle_per_key
    }

    pub fn max_idle_per_key(&self) -> usize {
        self.max_idle_per_key
    }

    pub fn max_total_per_key(&self) -> usize {
        self.max_total_per_key
    }

    pub fn max_total(&self) -> usize {
        self.max_total
    }

    pub fn max_block_wait(&self) -> Duration {
        Duration::from_millis(self.max_block_wait_ms)
    }

    pub fn min_evictable_idle(&self) -> Duration {
        Duration::from_millis(self.min_evictable_idle_ms)
    }

    /// Eviction interval, or `None` when background eviction is disabled
    pub fn time_between_eviction_runs(&self) -> Option<Duration> {
        (self.time_between_eviction_runs_ms > 0)
            .then(|| Duration::from_millis(self.time_between_eviction_runs_ms))
    }

    pub fn test_on_borrow(&self) -> bool {
        self.test_on_borrow
    }

    pub fn test_on_return(&self) -> bool {
        self.test_on_return
    }

    /// Check the sizing limits for consistency
    pub fn validate(&self) -> Result<()> {
        if self.max_total_per_key == 0 {
            return Err(PoolError::Configuration(
                "max_total_per_key must be greater than 0".into(),
            ));
        }
        if self.max_total == 0 {
            return Err(PoolError::Configuration(
                "max_total must be greater than 0".into(),
            ));
        }
        if self.min_idle_per_key > self.max_idle_per_key {
            return Err(PoolError::Configuration(format!(
                "min_idle_per_key ({}) cannot exceed max_idle_per_key ({})",
                self.min_idle_per_key, self.max_idle_per_key
            )));
        }
        Ok(())
    }
}

impl Default for PoolConfig {
    /// Create a default pool configuration
    ///
    /// Defaults:
    /// - min_idle_per_key: 1
    /// - max_idle_per_key: 2
    /// - max_total_per_key: 5
    /// - max_total: 1000
    /// - max_block_wait: 3 seconds
    /// - min_evictable_idle: 10 seconds
    /// - time_between_eviction_runs: 5 seconds
    /// - test_on_borrow / test_on_return: false
    fn default() -> Self {
        Self {
            min_idle_per_key: 1,
            max_idle_per_key: 2,
            max_total_per_key: 5,
            max_total: 1000,
            max_block_wait_ms: 3_000,
            min_evictable_idle_ms: 10_000,
            time_between_eviction_runs_ms: 5_000,
            test_on_borrow: false,
            test_on_return: false,
        }
    }
}

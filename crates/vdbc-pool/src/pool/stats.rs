//! Pool statistics types

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::{Duration, Instant};

/// Point-in-time client counts for one key or for the whole pool
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    total: usize,
    idle: usize,
    active: usize,
    /// Borrowers blocked in `get_client`
    waiting: usize,
}

impl PoolStats {
    pub fn new(total: usize, idle: usize, active: usize, waiting: usize) -> Self {
        Self { total, idle, active, waiting }
    }

    /// Live clients, idle and lent out
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn idle(&self) -> usize {
        self.idle
    }

    /// Clients currently lent out
    pub fn active(&self) -> usize {
        self.active
    }

    pub fn waiting(&self) -> usize {
        self.waiting
    }

    /// Share of live clients that are lent out, 0.0 for an empty pool
    pub fn utilization(&self) -> f64 {
        match self.total {
            0 => 0.0,
            total => self.active as f64 / total as f64,
        }
    }

    /// True when clients exist and none of them is idle
    pub fn is_full(&self) -> bool {
        self.total > 0 && self.idle == 0
    }

    /// Sum of two snapshots, used to total across keys
    pub fn merge(self, other: PoolStats) -> PoolStats {
        Self {
            total: self.total + other.total,
            idle: self.idle + other.idle,
            active: self.active + other.active,
            waiting: self.waiting + other.waiting,
        }
    }
}

/// Per-key statistics snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyStats {
    pub key: String,
    /// Current idle/active/waiting counts for the key
    pub current: PoolStats,
    /// Clients created for this key since the sub-pool was created
    pub created: u64,
    /// Clients destroyed for this key since the sub-pool was created
    pub destroyed: u64,
    /// Successful borrows since the sub-pool was created
    pub borrowed: u64,
    /// Successful borrows over the last second
    pub fetch_per_second: f64,
}

const BUCKETS: u64 = 10;
const BUCKET_WIDTH: Duration = Duration::from_millis(100);

/// Rolling one-second counter of events
///
/// Events are counted in ten 100ms buckets; the rate is the sum of the buckets
/// that still fall inside the window.
#[derive(Debug)]
pub struct ThroughputMeter {
    origin: Instant,
    /// (slot number, count) per bucket
    buckets: Mutex<[(u64, u64); BUCKETS as usize]>,
}

impl ThroughputMeter {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            buckets: Mutex::new([(0, 0); BUCKETS as usize]),
        }
    }

    fn slot(&self, at: Instant) -> u64 {
        (at.saturating_duration_since(self.origin).as_millis() / BUCKET_WIDTH.as_millis()) as u64
    }

    /// Record one event now
    pub fn record(&self) {
        self.record_at(Instant::now());
    }

    pub fn record_at(&self, at: Instant) {
        let slot = self.slot(at);
        let mut buckets = self.buckets.lock();
        let bucket = &mut buckets[(slot % BUCKETS) as usize];
        if bucket.0 != slot {
            *bucket = (slot, 0);
        }
        bucket.1 += 1;
    }

    /// Events per second over the last window
    pub fn rate(&self) -> f64 {
        self.rate_at(Instant::now())
    }

    pub fn rate_at(&self, at: Instant) -> f64 {
        let slot = self.slot(at);
        let buckets = self.buckets.lock();
        let count: u64 = buckets
            .iter()
            .filter(|(bucket_slot, _)| *bucket_slot <= slot && slot - *bucket_slot < BUCKETS)
            .map(|(_, count)| *count)
            .sum();
        // The window always spans BUCKETS * BUCKET_WIDTH = one second.
        count as f64
    }
}

impl Default for ThroughputMeter {
    fn default() -> Self {
        Self::new()
    }
}

//! Delays between borrow retries

use std::time::Duration;

use rand::Rng;

/// Share of a delay that jitter may add or remove
const JITTER_FRACTION: f64 = 0.25;

/// Exponential backoff for retrying an exhausted key.
///
/// The n-th retry (zero-based) waits `initial * multiplier^n`, capped at `max`.
/// With jitter on, each delay is spread over ±25% so borrowers that timed out
/// together do not come back together.
///
/// ```
/// use std::time::Duration;
/// use vdbc_pool::retry::BackoffStrategy;
///
/// let backoff = BackoffStrategy::new(50, 1_000);
/// assert_eq!(backoff.calculate_delay(0), Duration::from_millis(50));
/// assert_eq!(backoff.calculate_delay(2), Duration::from_millis(200));
/// assert_eq!(backoff.calculate_delay(10), Duration::from_secs(1));
/// ```
#[derive(Debug, Clone)]
pub struct BackoffStrategy {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    jitter: bool,
}

impl BackoffStrategy {
    /// Backoff starting at `initial_ms` and never exceeding `max_ms`.
    ///
    /// The initial delay is at least 1ms and the cap is at least the initial
    /// delay.
    pub fn new(initial_ms: u64, max_ms: u64) -> Self {
        let initial = Duration::from_millis(initial_ms.max(1));
        Self {
            initial,
            max: Duration::from_millis(max_ms).max(initial),
            multiplier: 2.0,
            jitter: false,
        }
    }

    /// Growth factor per retry, clamped to at least 1.0
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before retry number `attempt` (zero-based)
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let growth = self.multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let grown_ms = self.initial.as_millis() as f64 * growth;
        let capped = Duration::from_millis(grown_ms.min(self.max.as_millis() as f64) as u64);

        if !self.jitter {
            return capped;
        }
        let spread = capped.mul_f64(JITTER_FRACTION);
        let offset = rand::thread_rng().gen_range(Duration::ZERO..=spread * 2);
        (capped - spread) + offset
    }

    pub fn initial_delay(&self) -> Duration {
        self.initial
    }

    pub fn max_delay(&self) -> Duration {
        self.max
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    pub fn has_jitter(&self) -> bool {
        self.jitter
    }
}

impl Default for BackoffStrategy {
    /// 100ms doubling up to 30s, no jitter
    fn default() -> Self {
        Self::new(100, 30_000)
    }
}

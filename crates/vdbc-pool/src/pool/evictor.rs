//! Background idle eviction
//!
//! The evictor is a periodic tokio task owned by the pool. It holds only a weak
//! reference to the pool state, so it winds down on its own once the pool is
//! dropped; `close()` stops it explicitly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use vdbc_core::ClientFactory;

use super::shared::PoolShared;

/// Handle to the running eviction task
pub(crate) struct Evictor {
    interval: Duration,
    task: JoinHandle<()>,
    running: Arc<AtomicBool>,
}

impl Evictor {
    /// Spawn the eviction task on the current tokio runtime
    pub(crate) fn spawn<F: ClientFactory>(shared: Weak<PoolShared<F>>, interval: Duration) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(pool) = shared.upgrade() else {
                    break;
                };
                if pool.is_closed() {
                    break;
                }
                let evicted = pool.evict_idle().await;
                if evicted > 0 {
                    tracing::debug!(evicted, "eviction run finished");
                }
            }
            flag.store(false, Ordering::SeqCst);
            tracing::debug!("evictor stopped");
        });

        tracing::debug!(?interval, "evictor started");
        Self {
            interval,
            task,
            running,
        }
    }

    pub(crate) fn interval(&self) -> Duration {
        self.interval
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) && !self.task.is_finished()
    }

    pub(crate) fn stop(&self) {
        self.task.abort();
        self.running.store(false, Ordering::SeqCst);
    }
}

impl Drop for Evictor {
    fn drop(&mut self) {
        self.task.abort();
    }
}

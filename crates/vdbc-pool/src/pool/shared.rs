//! State shared between the pool handle, its sub-pools and the evictor

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use parking_lot::RwLock;
use tokio::sync::Notify;
use vdbc_core::{ClientFactory, PoolError, Result};

use super::config::PoolConfig;
use super::lease::PooledClient;
use super::sub_pool::SubPool;

/// Global client budget shared by every key
///
/// Each live client (idle, active, or being created) holds one unit.
#[derive(Debug)]
pub(crate) struct GlobalBudget {
    used: AtomicUsize,
    max: usize,
}

impl GlobalBudget {
    pub(crate) fn new(max: usize) -> Self {
        Self {
            used: AtomicUsize::new(0),
            max,
        }
    }

    /// Reserve one unit, failing if the cap is reached
    pub(crate) fn try_reserve(&self) -> bool {
        self.used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                (used < self.max).then_some(used + 1)
            })
            .is_ok()
    }

    pub(crate) fn release(&self) {
        let previous = self
            .used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| used.checked_sub(1));
        debug_assert!(previous.is_ok(), "global budget released below zero");
    }

    pub(crate) fn used(&self) -> usize {
        self.used.load(Ordering::Acquire)
    }

    pub(crate) fn is_full(&self) -> bool {
        self.used() >= self.max
    }
}

pub(crate) struct PoolShared<F: ClientFactory> {
    pub(crate) factory: F,
    pub(crate) config: PoolConfig,
    default_connect: F::Config,
    overrides: RwLock<HashMap<String, F::Config>>,
    pools: RwLock<HashMap<String, Arc<SubPool<F>>>>,
    pub(crate) budget: GlobalBudget,
    /// Signalled whenever budget is released, or a client is parked idle while
    /// the budget is exhausted
    pub(crate) capacity_freed: Notify,
    closed: AtomicBool,
    next_client_id: AtomicU64,
    next_generation: AtomicU64,
    /// Handle to ourselves for background closes
    this: Weak<PoolShared<F>>,
}

impl<F: ClientFactory> PoolShared<F> {
    pub(crate) fn new(config: PoolConfig, default_connect: F::Config, factory: F) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            factory,
            budget: GlobalBudget::new(config.max_total()),
            config,
            default_connect,
            overrides: RwLock::new(HashMap::new()),
            pools: RwLock::new(HashMap::new()),
            capacity_freed: Notify::new(),
            closed: AtomicBool::new(false),
            next_client_id: AtomicU64::new(1),
            next_generation: AtomicU64::new(1),
        })
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Mark closed; returns false if it already was
    pub(crate) fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn next_client_id(&self) -> u64 {
        self.next_client_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn register_override(&self, key: &str, config: F::Config) -> bool {
        self.overrides.write().insert(key.to_string(), config);
        self.pools.read().contains_key(key)
    }

    /// Connect config that applies to `key`
    pub(crate) fn connect_config_for(&self, key: &str) -> F::Config {
        self.overrides
            .read()
            .get(key)
            .cloned()
            .unwrap_or_else(|| self.default_connect.clone())
    }

    pub(crate) fn default_connect(&self) -> &F::Config {
        &self.default_connect
    }

    /// Look up the sub-pool for `key`, creating it on first use
    pub(crate) fn sub_pool(&self, key: &str) -> Result<Arc<SubPool<F>>> {
        if self.is_closed() {
            return Err(PoolError::Closed);
        }
        if let Some(pool) = self.pools.read().get(key) {
            return Ok(pool.clone());
        }

        let mut pools = self.pools.write();
        // close() may have drained the map while we waited for the write lock
        if self.is_closed() {
            return Err(PoolError::Closed);
        }
        let pool = pools.entry(key.to_string()).or_insert_with(|| {
            let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(key = %key, generation, "creating sub-pool");
            Arc::new(SubPool::new(key, generation, self.connect_config_for(key)))
        });
        Ok(pool.clone())
    }

    pub(crate) fn existing(&self, key: &str) -> Option<Arc<SubPool<F>>> {
        self.pools.read().get(key).cloned()
    }

    pub(crate) fn all(&self) -> Vec<Arc<SubPool<F>>> {
        self.pools.read().values().cloned().collect()
    }

    pub(crate) fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.pools.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Detach the sub-pool for `key` from the map
    pub(crate) fn remove(&self, key: &str) -> Option<Arc<SubPool<F>>> {
        self.pools.write().remove(key)
    }

    pub(crate) fn remove_all(&self) -> Vec<Arc<SubPool<F>>> {
        self.pools.write().drain().map(|(_, pool)| pool).collect()
    }

    /// Close a client through the factory and give its budget back.
    ///
    /// Factory errors are logged and swallowed. The budget is released even if
    /// this future is dropped before the factory finishes.
    pub(crate) async fn destroy(&self, key: &str, client: F::Client) {
        let _release = BudgetRelease { shared: self, key };
        if let Err(source) = self.factory.destroy(client).await {
            let err = PoolError::Destroy {
                key: key.to_string(),
                source,
            };
            tracing::warn!(key = %key, error = %err, "client destroy failed");
        }
    }

    /// Close clients one after the other.
    ///
    /// Clients not yet handed to the factory when this future is dropped are
    /// closed in the background instead.
    pub(crate) async fn destroy_each(&self, doomed: Vec<(String, F::Client)>) {
        let mut queue = DestroyQueue {
            shared: self,
            queue: doomed.into(),
        };
        while let Some((key, client)) = queue.queue.pop_front() {
            self.destroy(&key, client).await;
        }
    }

    /// Close a client on a spawned task, for callers that cannot await.
    ///
    /// Without a runtime the client is dropped and only its budget released.
    pub(crate) fn destroy_detached(&self, key: String, client: F::Client) {
        let runtime = tokio::runtime::Handle::try_current().ok();
        match (runtime, self.this.upgrade()) {
            (Some(runtime), Some(shared)) => {
                runtime.spawn(async move { shared.destroy(&key, client).await });
            }
            _ => {
                tracing::warn!(key = %key, "no tokio runtime to close client; dropping it");
                drop(client);
                self.forget(&key);
            }
        }
    }

    /// Give back the budget of a client that is gone without a factory close
    pub(crate) fn forget(&self, key: &str) {
        self.budget.release();
        self.capacity_freed.notify_waiters();
        tracing::trace!(key = %key, total = self.budget.used(), "client budget released");
    }

    /// Route a returned lease to the sub-pool that issued it.
    ///
    /// Leases whose sub-pool has been cleared or closed are destroyed directly.
    pub(crate) async fn give_back(&self, lease: PooledClient<F::Client>) {
        match self.existing(lease.key()) {
            Some(pool) if pool.generation() == lease.generation() => pool.give_back(self, lease).await,
            _ => {
                tracing::debug!(
                    key = %lease.key(),
                    client_id = lease.id(),
                    "returning client to a removed sub-pool, destroying it"
                );
                let key = lease.key().to_string();
                self.destroy(&key, lease.into_inner()).await;
            }
        }
    }

    /// Synchronous half of a return, for use from `Drop`.
    ///
    /// Returns clients that must still be closed.
    pub(crate) fn check_in(&self, lease: PooledClient<F::Client>) -> Vec<(String, F::Client)> {
        match self.existing(lease.key()) {
            Some(pool) if pool.generation() == lease.generation() => pool.check_in(self, lease),
            _ => {
                let key = lease.key().to_string();
                vec![(key, lease.into_inner())]
            }
        }
    }

    /// Destroy the oldest idle client of any key other than `except`.
    ///
    /// Used when a borrow is blocked only by the global cap.
    pub(crate) async fn reclaim_oldest_idle(&self, except: &str) -> bool {
        let oldest = self
            .all()
            .into_iter()
            .filter(|pool| pool.key() != except)
            .filter_map(|pool| pool.oldest_idle_since().map(|since| (since, pool)))
            .min_by_key(|(since, _)| *since);

        let Some((_, pool)) = oldest else {
            return false;
        };
        match pool.take_oldest_idle() {
            Some(client) => {
                tracing::debug!(key = %pool.key(), for_key = %except, "reclaiming oldest idle client");
                pool.record_destroyed();
                self.destroy(pool.key(), client).await;
                true
            }
            None => false,
        }
    }

    /// Run one eviction pass over every sub-pool
    pub(crate) async fn evict_idle(&self) -> usize {
        let mut evicted = 0;
        for pool in self.all() {
            evicted += pool.evict_idle(self).await;
        }
        evicted
    }
}

/// Releases one budget unit when dropped
struct BudgetRelease<'a, F: ClientFactory> {
    shared: &'a PoolShared<F>,
    key: &'a str,
}

impl<F: ClientFactory> Drop for BudgetRelease<'_, F> {
    fn drop(&mut self) {
        self.shared.forget(self.key);
    }
}

/// Clients waiting their turn in [`PoolShared::destroy_each`]
struct DestroyQueue<'a, F: ClientFactory> {
    shared: &'a PoolShared<F>,
    queue: VecDeque<(String, F::Client)>,
}

impl<F: ClientFactory> Drop for DestroyQueue<'_, F> {
    fn drop(&mut self) {
        for (key, client) in self.queue.drain(..) {
            self.shared.destroy_detached(key, client);
        }
    }
}

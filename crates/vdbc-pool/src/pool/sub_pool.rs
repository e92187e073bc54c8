//! Per-key sub-pool
//!
//! A `SubPool` owns the idle clients of one key and tracks which of its clients
//! are borrowed. All bookkeeping happens under one short-lived mutex; factory
//! calls are always made with the lock released.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use vdbc_core::{ClientFactory, PoolError, Result};

use super::lease::PooledClient;
use super::shared::PoolShared;
use super::stats::{KeyStats, PoolStats, ThroughputMeter};

struct IdleClient<C> {
    client: C,
    id: u64,
    created_at: Instant,
    idle_since: Instant,
}

struct SubPoolState<C> {
    /// Oldest return at the front, most recent at the back
    idle: VecDeque<IdleClient<C>>,
    /// Ids of borrowed clients
    active: HashSet<u64>,
    /// Slots reserved for clients being created
    pending: usize,
    /// Set once the sub-pool has been cleared; nothing is parked here afterwards
    retired: bool,
}

impl<C> SubPoolState<C> {
    fn total(&self) -> usize {
        self.idle.len() + self.active.len() + self.pending
    }
}

enum Checkout<C> {
    Idle(IdleClient<C>),
    Create,
    KeyFull,
    GlobalFull,
    Retired,
}

/// The clients of a single key
pub struct SubPool<F: ClientFactory> {
    key: String,
    generation: u64,
    connect_config: F::Config,
    state: Mutex<SubPoolState<F::Client>>,
    /// Signalled when a client is returned to this key
    available: Notify,
    waiting: AtomicUsize,
    created: AtomicU64,
    destroyed: AtomicU64,
    borrowed: AtomicU64,
    throughput: ThroughputMeter,
}

impl<F: ClientFactory> SubPool<F> {
    pub(crate) fn new(key: &str, generation: u64, connect_config: F::Config) -> Self {
        Self {
            key: key.to_string(),
            generation,
            connect_config,
            state: Mutex::new(SubPoolState {
                idle: VecDeque::new(),
                active: HashSet::new(),
                pending: 0,
                retired: false,
            }),
            available: Notify::new(),
            waiting: AtomicUsize::new(0),
            created: AtomicU64::new(0),
            destroyed: AtomicU64::new(0),
            borrowed: AtomicU64::new(0),
            throughput: ThroughputMeter::new(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// Connection parameters this sub-pool creates clients with
    pub fn connect_config(&self) -> &F::Config {
        &self.connect_config
    }

    /// Borrow a client, waiting until `deadline` for capacity.
    ///
    /// Fails with `InvalidKeyState` if the sub-pool is cleared while the caller
    /// waits; the keyed pool then retries against a fresh sub-pool.
    pub(crate) async fn borrow(
        &self,
        shared: &PoolShared<F>,
        deadline: Instant,
    ) -> Result<PooledClient<F::Client>> {
        let started = Instant::now();

        loop {
            // Register interest before inspecting state so a return that lands
            // between the check and the wait is not missed.
            let available = self.available.notified();
            let freed = shared.capacity_freed.notified();
            tokio::pin!(available, freed);
            available.as_mut().enable();
            freed.as_mut().enable();

            match self.try_checkout(shared) {
                Checkout::Idle(idle) => match self.activate_idle(shared, idle).await {
                    Some(lease) => return Ok(lease),
                    None => continue,
                },
                Checkout::Create => return self.create_active(shared).await,
                Checkout::Retired => return Err(PoolError::InvalidKeyState(self.key.clone())),
                Checkout::GlobalFull => {
                    if shared.reclaim_oldest_idle(&self.key).await {
                        continue;
                    }
                }
                Checkout::KeyFull => {}
            }

            let _waiting = WaitingGuard::new(&self.waiting);
            let woke = tokio::time::timeout_at(deadline, async {
                tokio::select! {
                    _ = &mut available => {}
                    _ = &mut freed => {}
                }
            })
            .await;

            if woke.is_err() {
                let waited = started.elapsed();
                tracing::debug!(key = %self.key, ?waited, "borrow timed out");
                return Err(PoolError::Exhausted {
                    key: self.key.clone(),
                    waited,
                });
            }
        }
    }

    fn try_checkout(&self, shared: &PoolShared<F>) -> Checkout<F::Client> {
        let mut state = self.state.lock();
        if state.retired {
            return Checkout::Retired;
        }
        if let Some(idle) = state.idle.pop_back() {
            state.active.insert(idle.id);
            return Checkout::Idle(idle);
        }
        if state.total() >= shared.config.max_total_per_key() {
            return Checkout::KeyFull;
        }
        if !shared.budget.try_reserve() {
            return Checkout::GlobalFull;
        }
        state.pending += 1;
        Checkout::Create
    }

    /// Turn a checked-out idle client into a lease, validating it first when
    /// configured. Returns `None` if validation failed and the client was destroyed.
    async fn activate_idle(
        &self,
        shared: &PoolShared<F>,
        idle: IdleClient<F::Client>,
    ) -> Option<PooledClient<F::Client>> {
        let client = if shared.config.test_on_borrow() {
            let check = Validation::new(self, shared, idle.id, idle.client);
            if !check.passes().await {
                tracing::warn!(key = %self.key, client_id = idle.id, "idle client failed validation, destroying");
                check.reject().await;
                return None;
            }
            check.keep()?
        } else {
            idle.client
        };

        self.record_borrow();
        Some(PooledClient::new(
            client,
            idle.id,
            &self.key,
            self.generation,
            idle.created_at,
        ))
    }

    async fn create_active(&self, shared: &PoolShared<F>) -> Result<PooledClient<F::Client>> {
        let slot = PendingSlot::new(self, shared);
        tracing::debug!(key = %self.key, "creating client");

        match shared.factory.create(&self.connect_config).await {
            Ok(client) => {
                let id = shared.next_client_id();
                slot.activate(id);
                self.created.fetch_add(1, Ordering::Relaxed);
                self.record_borrow();
                tracing::debug!(key = %self.key, client_id = id, "client created");
                Ok(PooledClient::new(
                    client,
                    id,
                    &self.key,
                    self.generation,
                    Instant::now(),
                ))
            }
            Err(source) => {
                drop(slot);
                tracing::warn!(key = %self.key, error = %source, "client creation failed");
                Err(PoolError::Creation {
                    key: self.key.clone(),
                    source,
                })
            }
        }
    }

    /// Return a lease, validating it first when configured
    pub(crate) async fn give_back(&self, shared: &PoolShared<F>, mut lease: PooledClient<F::Client>) {
        if shared.config.test_on_return() {
            let (id, created_at) = (lease.id(), lease.created_at());
            let check = Validation::new(self, shared, id, lease.into_inner());
            if !check.passes().await {
                tracing::warn!(key = %self.key, client_id = id, "returned client failed validation, destroying");
                check.reject().await;
                return;
            }
            let Some(client) = check.keep() else {
                return;
            };
            lease = PooledClient::new(client, id, &self.key, self.generation, created_at);
        }

        shared.destroy_each(self.check_in(shared, lease)).await;
    }

    /// Park a lease as idle and trim the idle set down to `max_idle_per_key`.
    ///
    /// Returns the clients that must be closed: the oldest idle clients over the
    /// cap, or the returned client itself if this sub-pool has been retired.
    pub(crate) fn check_in(
        &self,
        shared: &PoolShared<F>,
        lease: PooledClient<F::Client>,
    ) -> Vec<(String, F::Client)> {
        let max_idle = shared.config.max_idle_per_key();
        let id = lease.id();

        let mut state = self.state.lock();
        let known = state.active.remove(&id);
        if state.retired || !known {
            drop(state);
            tracing::debug!(key = %self.key, client_id = id, "client returned after clear, destroying");
            self.record_destroyed();
            return vec![(self.key.clone(), lease.into_inner())];
        }

        let created_at = lease.created_at();
        state.idle.push_back(IdleClient {
            client: lease.into_inner(),
            id,
            created_at,
            idle_since: Instant::now(),
        });

        let mut surplus = Vec::new();
        while state.idle.len() > max_idle {
            match state.idle.pop_front() {
                Some(oldest) => surplus.push((self.key.clone(), oldest.client)),
                None => break,
            }
        }
        drop(state);

        if !surplus.is_empty() {
            tracing::debug!(key = %self.key, count = surplus.len(), "idle cap exceeded, destroying oldest");
            self.destroyed.fetch_add(surplus.len() as u64, Ordering::Relaxed);
        }
        self.available.notify_one();
        // Borrowers of other keys blocked on the global cap can now reclaim it.
        if shared.budget.is_full() {
            shared.capacity_freed.notify_waiters();
        }
        surplus
    }

    /// Destroy idle clients that have outlived `min_evictable_idle`, oldest
    /// first, never going below `min_idle_per_key`.
    pub(crate) async fn evict_idle(&self, shared: &PoolShared<F>) -> usize {
        let min_idle = shared.config.min_idle_per_key();
        let min_evictable = shared.config.min_evictable_idle();
        let now = Instant::now();

        let victims: Vec<(String, F::Client)> = {
            let mut state = self.state.lock();
            let mut victims = Vec::new();
            while state.idle.len() > min_idle {
                let expired = state.idle.front().is_some_and(|oldest| {
                    now.saturating_duration_since(oldest.idle_since) > min_evictable
                });
                if !expired {
                    break;
                }
                if let Some(oldest) = state.idle.pop_front() {
                    tracing::debug!(key = %self.key, client_id = oldest.id, "evicting idle client");
                    victims.push((self.key.clone(), oldest.client));
                }
            }
            victims
        };

        let evicted = victims.len();
        self.destroyed.fetch_add(evicted as u64, Ordering::Relaxed);
        shared.destroy_each(victims).await;
        evicted
    }

    /// Create idle clients until `min_idle_per_key` is reached or capacity runs out
    pub(crate) async fn warm_up(&self, shared: &PoolShared<F>) -> Result<usize> {
        let target = shared.config.min_idle_per_key();
        let mut created = 0;

        loop {
            {
                let mut state = self.state.lock();
                if state.retired {
                    return Err(PoolError::InvalidKeyState(self.key.clone()));
                }
                if state.idle.len() >= target || state.total() >= shared.config.max_total_per_key() {
                    break;
                }
                if !shared.budget.try_reserve() {
                    tracing::debug!(key = %self.key, "global cap reached during warm-up");
                    break;
                }
                state.pending += 1;
            }

            let slot = PendingSlot::new(self, shared);
            let client = shared
                .factory
                .create(&self.connect_config)
                .await
                .map_err(|source| PoolError::Creation {
                    key: self.key.clone(),
                    source,
                })?;
            self.created.fetch_add(1, Ordering::Relaxed);

            let now = Instant::now();
            let idle = IdleClient {
                client,
                id: shared.next_client_id(),
                created_at: now,
                idle_since: now,
            };
            if let Some(client) = slot.park(idle) {
                self.record_destroyed();
                shared.destroy(&self.key, client).await;
                return Err(PoolError::InvalidKeyState(self.key.clone()));
            }
            created += 1;
        }

        tracing::debug!(key = %self.key, created, "warm-up finished");
        Ok(created)
    }

    /// Retire the sub-pool and hand back its idle clients for closing.
    ///
    /// Borrowed clients are destroyed when they come back.
    pub(crate) fn retire(&self) -> Vec<(String, F::Client)> {
        let (idle, outstanding) = {
            let mut state = self.state.lock();
            state.retired = true;
            let idle: Vec<_> = state
                .idle
                .drain(..)
                .map(|entry| (self.key.clone(), entry.client))
                .collect();
            (idle, state.active.len())
        };
        // Waiters re-route to the replacement sub-pool.
        self.available.notify_waiters();

        self.destroyed.fetch_add(idle.len() as u64, Ordering::Relaxed);
        tracing::info!(key = %self.key, idle = idle.len(), outstanding, "sub-pool cleared");
        idle
    }

    pub(crate) fn oldest_idle_since(&self) -> Option<Instant> {
        self.state.lock().idle.front().map(|idle| idle.idle_since)
    }

    pub(crate) fn take_oldest_idle(&self) -> Option<F::Client> {
        self.state.lock().idle.pop_front().map(|idle| idle.client)
    }

    pub fn idle_count(&self) -> usize {
        self.state.lock().idle.len()
    }

    pub fn active_count(&self) -> usize {
        self.state.lock().active.len()
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        let idle = state.idle.len();
        let active = state.active.len();
        PoolStats::new(idle + active, idle, active, self.waiting.load(Ordering::SeqCst))
    }

    pub fn key_stats(&self) -> KeyStats {
        KeyStats {
            key: self.key.clone(),
            current: self.stats(),
            created: self.created.load(Ordering::Relaxed),
            destroyed: self.destroyed.load(Ordering::Relaxed),
            borrowed: self.borrowed.load(Ordering::Relaxed),
            fetch_per_second: self.throughput.rate(),
        }
    }

    /// Successful borrows over the last second
    pub fn fetch_per_second(&self) -> f64 {
        self.throughput.rate()
    }

    pub(crate) fn record_destroyed(&self) {
        self.destroyed.fetch_add(1, Ordering::Relaxed);
    }

    fn record_borrow(&self) {
        self.borrowed.fetch_add(1, Ordering::Relaxed);
        self.throughput.record();
    }
}

/// Decrements the waiting counter when the borrower stops waiting
struct WaitingGuard<'a>(&'a AtomicUsize);

impl<'a> WaitingGuard<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A pending slot reserved in `try_checkout` or `warm_up`.
///
/// The slot holds one unit of global budget. If it is dropped unresolved, for
/// instance because the borrowing future was cancelled mid-create, the slot and
/// its budget are handed back.
struct PendingSlot<'a, F: ClientFactory> {
    pool: &'a SubPool<F>,
    shared: &'a PoolShared<F>,
    armed: bool,
}

impl<'a, F: ClientFactory> PendingSlot<'a, F> {
    fn new(pool: &'a SubPool<F>, shared: &'a PoolShared<F>) -> Self {
        Self {
            pool,
            shared,
            armed: true,
        }
    }

    /// The slot's client is now borrowed
    fn activate(mut self, id: u64) {
        let mut state = self.pool.state.lock();
        state.pending -= 1;
        state.active.insert(id);
        self.armed = false;
    }

    /// Park the slot's client as idle. Hands the client back if the sub-pool
    /// was retired meanwhile.
    fn park(mut self, idle: IdleClient<F::Client>) -> Option<F::Client> {
        self.armed = false;
        let mut state = self.pool.state.lock();
        state.pending -= 1;
        if state.retired {
            return Some(idle.client);
        }
        state.idle.push_back(idle);
        drop(state);
        self.pool.available.notify_one();
        None
    }
}

impl<F: ClientFactory> Drop for PendingSlot<'_, F> {
    fn drop(&mut self) {
        if self.armed {
            self.pool.state.lock().pending -= 1;
            self.shared.forget(&self.pool.key);
            self.pool.available.notify_one();
        }
    }
}

/// A borrowed client held across `ClientFactory::validate`.
///
/// The client's id is in the active set for the duration. If the caller is
/// dropped mid-validation the client is retired and closed in the background.
struct Validation<'a, F: ClientFactory> {
    pool: &'a SubPool<F>,
    shared: &'a PoolShared<F>,
    id: u64,
    client: Option<F::Client>,
}

impl<'a, F: ClientFactory> Validation<'a, F> {
    fn new(pool: &'a SubPool<F>, shared: &'a PoolShared<F>, id: u64, client: F::Client) -> Self {
        Self {
            pool,
            shared,
            id,
            client: Some(client),
        }
    }

    async fn passes(&self) -> bool {
        match &self.client {
            Some(client) => self.shared.factory.validate(client).await,
            None => false,
        }
    }

    /// The client stays borrowed
    fn keep(mut self) -> Option<F::Client> {
        self.client.take()
    }

    /// Drop the client from the active set and close it
    async fn reject(mut self) {
        if let Some(client) = self.client.take() {
            self.forget_active();
            self.shared.destroy(&self.pool.key, client).await;
        }
    }

    fn forget_active(&self) {
        self.pool.state.lock().active.remove(&self.id);
        self.pool.record_destroyed();
        self.pool.available.notify_one();
    }
}

impl<F: ClientFactory> Drop for Validation<'_, F> {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            self.forget_active();
            self.shared.destroy_detached(self.pool.key.clone(), client);
        }
    }
}

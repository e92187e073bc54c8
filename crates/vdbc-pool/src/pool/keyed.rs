//! Keyed connection pool

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::time::Instant;
use vdbc_core::{ClientFactory, PoolError, Result};

use super::config::PoolConfig;
use super::evictor::Evictor;
use super::lease::{ClientGuard, PooledClient};
use super::shared::PoolShared;
use super::stats::{KeyStats, PoolStats};
use super::sub_pool::SubPool;
use crate::retry::RetryPolicy;

/// A pool of remote-service clients partitioned by key
///
/// Each key (a tenant, a logical database, ...) gets its own sub-pool, created
/// lazily on first use. Keys are isolated from each other except for the
/// shared `max_total` budget. Idle clients are reaped by a background task
/// started in [`new`](Self::new) and stopped by [`close`](Self::close).
pub struct KeyedConnectionPool<F: ClientFactory> {
    shared: Arc<PoolShared<F>>,
    evictor: Mutex<Option<Evictor>>,
}

impl<F: ClientFactory> KeyedConnectionPool<F> {
    /// Create a pool.
    ///
    /// `default_connect` is used for every key without an override registered
    /// through [`config_for_key`](Self::config_for_key). When background
    /// eviction is enabled this must be called from within a tokio runtime.
    pub fn new(config: PoolConfig, default_connect: F::Config, factory: F) -> Result<Self> {
        config.validate()?;

        let interval = config.time_between_eviction_runs();
        let shared = PoolShared::new(config, default_connect, factory);
        let evictor = match interval {
            Some(interval) => {
                if tokio::runtime::Handle::try_current().is_err() {
                    return Err(PoolError::Configuration(
                        "background eviction needs a tokio runtime; set a zero eviction interval to disable it"
                            .into(),
                    ));
                }
                Some(Evictor::spawn(Arc::downgrade(&shared), interval))
            }
            None => None,
        };

        tracing::info!(
            max_total = shared.config.max_total(),
            max_total_per_key = shared.config.max_total_per_key(),
            eviction_interval = ?interval,
            "keyed connection pool created"
        );

        Ok(Self {
            shared,
            evictor: Mutex::new(evictor),
        })
    }

    /// Get the pool configuration
    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    pub fn factory(&self) -> &F {
        &self.shared.factory
    }

    pub fn default_connect_config(&self) -> &F::Config {
        self.shared.default_connect()
    }

    /// Connect config a new sub-pool for `key` would be created with
    pub fn connect_config_for(&self, key: &str) -> F::Config {
        self.shared.connect_config_for(key)
    }

    /// Borrow a client for `key`
    ///
    /// This will:
    /// 1. Hand out an idle client of the key if one exists
    /// 2. Otherwise create one if the key and the pool are under their caps
    /// 3. Otherwise wait up to `max_block_wait` for a client to come back
    ///
    /// Fails with `Exhausted` on timeout and with `Creation` if the factory
    /// fails. Neither is retried here.
    #[tracing::instrument(skip_all, fields(key = %key))]
    pub async fn get_client(&self, key: &str) -> Result<PooledClient<F::Client>> {
        let started = Instant::now();
        let deadline = started + self.shared.config.max_block_wait();

        loop {
            let pool = self.shared.sub_pool(key)?;
            match pool.borrow(&self.shared, deadline).await {
                Err(PoolError::InvalidKeyState(_)) => {
                    if self.shared.is_closed() {
                        return Err(PoolError::Closed);
                    }
                    if Instant::now() >= deadline {
                        return Err(PoolError::Exhausted {
                            key: key.to_string(),
                            waited: started.elapsed(),
                        });
                    }
                    tracing::debug!("sub-pool cleared during borrow, retrying on a fresh one");
                }
                result => return result,
            }
        }
    }

    /// Borrow a client wrapped in a guard that returns it on drop
    pub async fn get(self: &Arc<Self>, key: &str) -> Result<ClientGuard<F>> {
        let lease = self.get_client(key).await?;
        Ok(ClientGuard::new(lease, self.clone()))
    }

    /// Borrow a client, retrying exhaustion with the policy's backoff
    pub async fn get_client_with_retry(
        &self,
        key: &str,
        policy: &RetryPolicy,
    ) -> Result<PooledClient<F::Client>> {
        policy.run(key, move || self.get_client(key)).await
    }

    /// Return a borrowed client
    ///
    /// If the key has been cleared since the client was borrowed, the client is
    /// destroyed instead.
    #[tracing::instrument(skip_all, fields(key = %key, client_id = client.id()))]
    pub async fn return_client(&self, key: &str, client: PooledClient<F::Client>) {
        if client.key() != key {
            tracing::warn!(
                lease_key = %client.key(),
                "client returned under a different key; routing by the key it was borrowed for"
            );
        }
        self.shared.give_back(client).await;
    }

    /// Return path used by [`ClientGuard`]'s `Drop`
    pub(crate) fn return_from_drop(&self, lease: PooledClient<F::Client>) {
        let runtime = tokio::runtime::Handle::try_current().ok();

        if self.shared.config.test_on_return()
            && let Some(runtime) = &runtime
        {
            let shared = self.shared.clone();
            runtime.spawn(async move { shared.give_back(lease).await });
            return;
        }

        for (key, client) in self.shared.check_in(lease) {
            self.shared.destroy_detached(key, client);
        }
    }

    /// Register the connect config for `key`
    ///
    /// Apply before first use of the key. An override registered after the
    /// sub-pool exists takes effect once the key is cleared.
    #[tracing::instrument(skip_all, fields(key = %key))]
    pub fn config_for_key(&self, key: &str, config: F::Config) -> Result<()> {
        if self.shared.is_closed() {
            return Err(PoolError::Closed);
        }
        if self.shared.register_override(key, config) {
            tracing::warn!("connect config registered after first use; applies after the key is cleared");
        } else {
            tracing::debug!("connect config registered");
        }
        Ok(())
    }

    /// Pre-create idle clients for `key` up to `min_idle_per_key`
    ///
    /// Returns the number of clients created.
    #[tracing::instrument(skip_all, fields(key = %key))]
    pub async fn prepare_pool(&self, key: &str) -> Result<usize> {
        loop {
            let pool = self.shared.sub_pool(key)?;
            match pool.warm_up(&self.shared).await {
                Err(PoolError::InvalidKeyState(_)) => continue,
                result => return result,
            }
        }
    }

    /// Destroy and remove the sub-pool for `key`
    ///
    /// Idle clients are closed now, borrowed ones when they are returned.
    /// Returns the number of clients closed now.
    #[tracing::instrument(skip_all, fields(key = %key))]
    pub async fn clear(&self, key: &str) -> usize {
        let Some(pool) = self.shared.remove(key) else {
            return 0;
        };
        let doomed = pool.retire();
        let destroyed = doomed.len();
        self.shared.destroy_each(doomed).await;
        destroyed
    }

    /// Clear every sub-pool; the pool stays usable
    #[tracing::instrument(skip(self))]
    pub async fn clear_all(&self) -> usize {
        let doomed: Vec<_> = self
            .shared
            .remove_all()
            .iter()
            .flat_map(|pool| pool.retire())
            .collect();
        let destroyed = doomed.len();
        self.shared.destroy_each(doomed).await;
        tracing::info!(destroyed, "all sub-pools cleared");
        destroyed
    }

    /// Stop the evictor and destroy every sub-pool
    ///
    /// The pool is unusable afterwards; clients still borrowed are destroyed
    /// when returned.
    #[tracing::instrument(skip(self))]
    pub async fn close(&self) {
        if !self.shared.mark_closed() {
            return;
        }
        if let Some(evictor) = self.evictor.lock().take() {
            evictor.stop();
        }
        self.clear_all().await;
        // Wake borrowers still parked on the global notify.
        self.shared.capacity_freed.notify_waiters();
        tracing::info!("keyed connection pool closed");
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Run one eviction pass now, outside the background schedule
    pub async fn evict_idle(&self) -> usize {
        self.shared.evict_idle().await
    }

    pub fn is_evictor_running(&self) -> bool {
        self.evictor.lock().as_ref().is_some_and(Evictor::is_running)
    }

    pub fn eviction_interval(&self) -> Option<std::time::Duration> {
        self.evictor.lock().as_ref().map(Evictor::interval)
    }

    /// The live sub-pool for `key`, if one exists
    pub fn sub_pool(&self, key: &str) -> Option<Arc<SubPool<F>>> {
        self.shared.existing(key)
    }

    /// Keys with a live sub-pool, sorted
    pub fn keys(&self) -> Vec<String> {
        self.shared.keys()
    }

    pub fn idle_client_number(&self, key: &str) -> usize {
        self.shared.existing(key).map_or(0, |pool| pool.idle_count())
    }

    pub fn active_client_number(&self, key: &str) -> usize {
        self.shared.existing(key).map_or(0, |pool| pool.active_count())
    }

    pub fn total_idle_client_number(&self) -> usize {
        self.shared.all().iter().map(|pool| pool.idle_count()).sum()
    }

    pub fn total_active_client_number(&self) -> usize {
        self.shared.all().iter().map(|pool| pool.active_count()).sum()
    }

    /// Clients currently alive across the pool, including ones being created
    /// and ones borrowed from keys that have since been cleared
    pub fn live_client_number(&self) -> usize {
        self.shared.budget.used()
    }

    /// Successful borrows for `key` over the last second
    pub fn fetch_client_per_second(&self, key: &str) -> f64 {
        self.shared
            .existing(key)
            .map_or(0.0, |pool| pool.fetch_per_second())
    }

    pub fn stats(&self, key: &str) -> Option<KeyStats> {
        self.shared.existing(key).map(|pool| pool.key_stats())
    }

    /// Pool-wide statistics summed over all keys
    pub fn stats_total(&self) -> PoolStats {
        self.shared
            .all()
            .iter()
            .map(|pool| pool.stats())
            .fold(PoolStats::default(), PoolStats::merge)
    }
}

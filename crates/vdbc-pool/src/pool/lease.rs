//! Borrowed client types

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use tokio::time::{Duration, Instant};
use vdbc_core::ClientFactory;

use super::keyed::KeyedConnectionPool;

/// A client borrowed from the pool
///
/// The lease owns the client for as long as it is borrowed. It cannot be
/// cloned, so a client is never held by two borrowers and cannot be returned
/// twice. Hand it back with
/// [`KeyedConnectionPool::return_client`](super::KeyedConnectionPool::return_client).
pub struct PooledClient<C> {
    client: C,
    id: u64,
    key: String,
    generation: u64,
    created_at: Instant,
    borrowed_at: Instant,
}

impl<C> PooledClient<C> {
    pub(crate) fn new(client: C, id: u64, key: &str, generation: u64, created_at: Instant) -> Self {
        Self {
            client,
            id,
            key: key.to_string(),
            generation,
            created_at,
            borrowed_at: Instant::now(),
        }
    }

    /// Pool-assigned identifier, unique for the lifetime of the pool
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Key the client was borrowed for
    pub fn key(&self) -> &str {
        &self.key
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// When the underlying client was created
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// When this lease was handed out
    pub fn borrowed_at(&self) -> Instant {
        self.borrowed_at
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// How long the client has been borrowed
    pub fn time_in_use(&self) -> Duration {
        self.borrowed_at.elapsed()
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub(crate) fn into_inner(self) -> C {
        self.client
    }
}

impl<C> Deref for PooledClient<C> {
    type Target = C;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

impl<C> fmt::Debug for PooledClient<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledClient")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

/// A borrowed client that returns itself to the pool when dropped
///
/// The bookkeeping half of the return runs synchronously in `Drop`; closing any
/// surplus client is spawned on the current tokio runtime.
pub struct ClientGuard<F: ClientFactory> {
    lease: Option<PooledClient<F::Client>>,
    pool: Arc<KeyedConnectionPool<F>>,
}

impl<F: ClientFactory> ClientGuard<F> {
    pub(crate) fn new(lease: PooledClient<F::Client>, pool: Arc<KeyedConnectionPool<F>>) -> Self {
        Self {
            lease: Some(lease),
            pool,
        }
    }

    /// Get the underlying lease
    pub fn lease(&self) -> &PooledClient<F::Client> {
        self.lease.as_ref().expect("lease taken")
    }

    /// Return the client now, awaiting any close it triggers
    pub async fn release(mut self) {
        if let Some(lease) = self.lease.take() {
            let key = lease.key().to_string();
            self.pool.return_client(&key, lease).await;
        }
    }

    /// Take the lease out of the guard; the caller becomes responsible for
    /// returning it
    pub fn detach(mut self) -> PooledClient<F::Client> {
        self.lease.take().expect("lease taken")
    }
}

impl<F: ClientFactory> Deref for ClientGuard<F> {
    type Target = F::Client;

    fn deref(&self) -> &Self::Target {
        self.lease().client()
    }
}

impl<F: ClientFactory> Drop for ClientGuard<F> {
    fn drop(&mut self) {
        if let Some(lease) = self.lease.take() {
            self.pool.return_from_drop(lease);
        }
    }
}

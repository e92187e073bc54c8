//! Test fixtures for exercising the keyed pool.
//!
//! [`FakeVectorFactory`] stands in for a remote vector-database SDK. It hands
//! out [`FakeClient`]s, tracks how many are alive per database, and can be told
//! to refuse connections or report clients as unhealthy. Tests then assert on
//! what the pool asked the factory to do.
//!
//! # Usage
//!
//! ```rust,ignore
//! use vdbc_pool_tests::fixtures::{pool_with, PoolShape};
//!
//! let (pool, factory) = pool_with(PoolShape::Tight.config());
//! let client = pool.get_client("tenant_a").await?;
//! assert_eq!(factory.live(), 1);
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use vdbc_core::{BoxError, ClientFactory, ConnectConfig};
use vdbc_pool::{KeyedConnectionPool, PoolConfig};

/// Database name used when a connect config names none
pub const DEFAULT_DATABASE: &str = "default";

/// Errors the fake server reports
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FakeServerError {
    /// The server refused the connection
    #[error("connection to {uri} refused")]
    Refused {
        /// Endpoint that refused
        uri: String,
    },

    /// The credentials do not grant access to the database
    #[error("access to database '{database}' denied")]
    Unauthorized {
        /// Database that was requested
        database: String,
    },
}

/// A connected client of the fake server
#[derive(Debug)]
pub struct FakeClient {
    /// Unique, increasing per factory
    pub serial: u64,
    /// Endpoint the client was connected to
    pub uri: String,
    /// Database the client was connected to
    pub database: String,
}

impl FakeClient {
    /// Pretend to run a search against the connected database
    pub async fn search(&self, collection: &str) -> String {
        tokio::task::yield_now().await;
        format!("{}/{}#{}", self.database, collection, self.serial)
    }
}

/// Live and peak counts for one database
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LiveCount {
    /// Clients currently alive
    pub live: usize,
    /// Highest number alive at once
    pub peak: usize,
}

/// Client factory backed by the fake server
#[derive(Debug, Default)]
pub struct FakeVectorFactory {
    serial: AtomicU64,
    created: AtomicUsize,
    destroyed: AtomicUsize,
    live: AtomicUsize,
    peak: AtomicUsize,
    per_database: Mutex<HashMap<String, LiveCount>>,
    destroyed_serials: Mutex<Vec<u64>>,
    refused_databases: Mutex<HashSet<String>>,
    unhealthy: AtomicBool,
    connect_latency: Mutex<Duration>,
}

impl FakeVectorFactory {
    /// Create a factory with no failures configured
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every connect take `latency`
    pub fn with_latency(self: Arc<Self>, latency: Duration) -> Arc<Self> {
        *self.connect_latency.lock() = latency;
        self
    }

    /// Refuse connections to `database` until [`allow`](Self::allow) is called
    pub fn refuse(&self, database: &str) {
        self.refused_databases.lock().insert(database.to_string());
    }

    /// Accept connections to `database` again
    pub fn allow(&self, database: &str) {
        self.refused_databases.lock().remove(database);
    }

    /// Report every client as unhealthy on validation
    pub fn set_unhealthy(&self, unhealthy: bool) {
        self.unhealthy.store(unhealthy, Ordering::SeqCst);
    }

    /// Clients created so far
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Clients destroyed so far
    pub fn destroyed(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Clients currently alive
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Highest number of clients alive at once
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Live and peak counts for `database`
    pub fn database(&self, database: &str) -> LiveCount {
        self.per_database
            .lock()
            .get(database)
            .copied()
            .unwrap_or_default()
    }

    /// Serials of destroyed clients, in destroy order
    pub fn destroyed_serials(&self) -> Vec<u64> {
        self.destroyed_serials.lock().clone()
    }
}

#[async_trait]
impl ClientFactory for FakeVectorFactory {
    type Client = FakeClient;
    type Config = ConnectConfig;

    async fn create(&self, config: &ConnectConfig) -> Result<FakeClient, BoxError> {
        let latency = *self.connect_latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let database = config
            .database
            .clone()
            .unwrap_or_else(|| DEFAULT_DATABASE.to_string());
        if self.refused_databases.lock().contains(&database) {
            return Err(FakeServerError::Refused {
                uri: config.uri.clone(),
            }
            .into());
        }
        if config.token.as_deref() == Some("revoked") {
            return Err(FakeServerError::Unauthorized { database }.into());
        }

        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(live, Ordering::SeqCst);
        self.created.fetch_add(1, Ordering::SeqCst);
        {
            let mut per_database = self.per_database.lock();
            let count = per_database.entry(database.clone()).or_default();
            count.live += 1;
            count.peak = count.peak.max(count.live);
        }

        Ok(FakeClient {
            serial: self.serial.fetch_add(1, Ordering::SeqCst),
            uri: config.uri.clone(),
            database,
        })
    }

    async fn destroy(&self, client: FakeClient) -> Result<(), BoxError> {
        self.live.fetch_sub(1, Ordering::SeqCst);
        self.destroyed.fetch_add(1, Ordering::SeqCst);
        self.destroyed_serials.lock().push(client.serial);
        if let Some(count) = self.per_database.lock().get_mut(&client.database) {
            count.live = count.live.saturating_sub(1);
        }
        Ok(())
    }

    async fn validate(&self, _client: &FakeClient) -> bool {
        !self.unhealthy.load(Ordering::SeqCst)
    }
}

/// Pool handle used throughout the suite
pub type TestPool = KeyedConnectionPool<Arc<FakeVectorFactory>>;

/// Common pool sizes used by parameterized tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolShape {
    /// One client per key, small global cap
    Tight,
    /// A few clients per key, global cap below the sum of key caps
    Contended,
    /// Key caps well under the global cap
    Roomy,
}

impl PoolShape {
    /// Pool config for this shape, with background eviction disabled
    ///
    /// Idle caps equal the per-key caps, so a key's clients are only closed
    /// when the key is cleared or another key reclaims them.
    pub fn config(self) -> PoolConfig {
        let config = match self {
            PoolShape::Tight => PoolConfig::new(0, 1, 1).with_max_total(2),
            PoolShape::Contended => PoolConfig::new(0, 3, 3).with_max_total(5),
            PoolShape::Roomy => PoolConfig::new(1, 4, 4).with_max_total(100),
        };
        config
            .with_max_block_wait(Duration::from_secs(5))
            .with_time_between_eviction_runs(Duration::ZERO)
    }

    /// Human-readable name for logs
    pub fn display_name(self) -> &'static str {
        match self {
            PoolShape::Tight => "tight",
            PoolShape::Contended => "contended",
            PoolShape::Roomy => "roomy",
        }
    }
}

/// Build a pool over a fresh [`FakeVectorFactory`]
pub fn pool_with(config: PoolConfig) -> (Arc<TestPool>, Arc<FakeVectorFactory>) {
    pool_with_factory(config, FakeVectorFactory::new())
}

/// Build a pool over the given factory
pub fn pool_with_factory(
    config: PoolConfig,
    factory: Arc<FakeVectorFactory>,
) -> (Arc<TestPool>, Arc<FakeVectorFactory>) {
    initialize_logging();
    let pool = KeyedConnectionPool::new(
        config,
        ConnectConfig::new("http://vectors.test:19530").with_token("test-token"),
        factory.clone(),
    )
    .expect("fixture pool config is valid");
    (Arc::new(pool), factory)
}

/// Register a connect config per tenant, each pointing at its own database
///
/// The factory's per-database counts then double as per-key counts.
pub fn register_tenants(pool: &TestPool, tenants: &[&str]) -> anyhow::Result<()> {
    for tenant in tenants {
        let config = pool.default_connect_config().for_database(*tenant);
        pool.config_for_key(tenant, config)?;
    }
    Ok(())
}

/// Initialize logging for tests if not already initialized
///
/// Honors `RUST_LOG`; output goes through the test writer so it is captured
/// per test.
pub fn initialize_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("vdbc_pool=warn")),
            )
            .with_test_writer()
            .finish();

        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

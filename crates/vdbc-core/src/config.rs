//! Connection parameters for a remote vector-database client

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// TLS material for a client connection
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Server name to verify against the certificate
    pub server_name: Option<String>,
    /// CA certificate used to verify the server
    pub ca_cert_path: Option<PathBuf>,
    /// Client certificate for mutual TLS
    pub client_cert_path: Option<PathBuf>,
    /// Client private key for mutual TLS
    pub client_key_path: Option<PathBuf>,
}

impl TlsConfig {
    /// Whether the client presents its own certificate
    pub fn is_mutual(&self) -> bool {
        self.client_cert_path.is_some() && self.client_key_path.is_some()
    }
}

/// Parameters a [`ClientFactory`](crate::ClientFactory) uses to dial the server.
///
/// One of these is the pool-wide default; a different one can be registered
/// per key, typically to target another logical database or tenant.
#[derive(Clone, Serialize, Deserialize)]
pub struct ConnectConfig {
    /// Server endpoint, e.g. `http://localhost:19530`
    pub uri: String,
    /// API token (takes precedence over username/password)
    pub token: Option<String>,
    /// Username
    pub username: Option<String>,
    /// Password
    pub password: Option<String>,
    /// Logical database the client is bound to
    pub database: Option<String>,
    /// Timeout for establishing the connection, in milliseconds
    pub connect_timeout_ms: u64,
    /// Keep-alive interval, in milliseconds
    pub keep_alive_ms: u64,
    /// TLS settings; `None` for plaintext
    pub tls: Option<TlsConfig>,
    /// Additional driver-specific parameters
    pub params: HashMap<String, String>,
}

impl ConnectConfig {
    /// Create a configuration for the given endpoint with default values
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            token: None,
            username: None,
            password: None,
            database: None,
            connect_timeout_ms: 10_000,
            keep_alive_ms: 55_000,
            tls: None,
            params: HashMap::new(),
        }
    }

    /// Authenticate with an API token
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Authenticate with username and password
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Bind the client to a logical database
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = ceil_millis(timeout);
        self
    }

    pub fn with_keep_alive(mut self, interval: Duration) -> Self {
        self.keep_alive_ms = ceil_millis(interval);
        self
    }

    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Set a connection parameter
    pub fn with_param(mut self, key: &str, value: &str) -> Self {
        self.params.insert(key.to_string(), value.to_string());
        self
    }

    /// Copy of this configuration targeting another database.
    ///
    /// Convenient for per-key overrides where only the database differs.
    pub fn for_database(&self, database: impl Into<String>) -> Self {
        self.clone().with_database(database)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_millis(self.keep_alive_ms)
    }

    /// Whether the connection uses TLS, either explicitly or through an `https` uri
    pub fn is_secure(&self) -> bool {
        self.tls.is_some() || self.uri.starts_with("https://")
    }
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self::new("http://localhost:19530")
    }
}

// Secrets never reach logs through Debug.
impl fmt::Debug for ConnectConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectConfig")
            .field("uri", &self.uri)
            .field("token", &self.token.as_ref().map(|_| "***"))
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("database", &self.database)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("keep_alive_ms", &self.keep_alive_ms)
            .field("tls", &self.tls)
            .field("params", &self.params)
            .finish()
    }
}

/// Milliseconds in `duration`, rounding a sub-millisecond remainder up.
///
/// A non-zero duration never becomes zero; durations past `u64::MAX`
/// milliseconds saturate.
pub fn ceil_millis(duration: Duration) -> u64 {
    let partial = duration.subsec_nanos() % 1_000_000 != 0;
    u64::try_from(duration.as_millis() + u128::from(partial)).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_config_defaults() {
        let config = ConnectConfig::default();
        assert_eq!(config.uri, "http://localhost:19530");
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        assert!(config.database.is_none());
        assert!(!config.is_secure());
    }

    #[test]
    fn test_ceil_millis_rounds_up() {
        assert_eq!(ceil_millis(Duration::ZERO), 0);
        assert_eq!(ceil_millis(Duration::from_micros(500)), 1);
        assert_eq!(ceil_millis(Duration::from_millis(250)), 250);
        assert_eq!(ceil_millis(Duration::from_micros(2_001)), 3);
        assert_eq!(ceil_millis(Duration::MAX), u64::MAX);

        let config = ConnectConfig::default().with_connect_timeout(Duration::from_micros(10));
        assert_eq!(config.connect_timeout(), Duration::from_millis(1));
    }

    #[test]
    fn test_for_database_keeps_credentials() {
        let base = ConnectConfig::new("https://vdb.example.com")
            .with_credentials("root", "secret")
            .with_database("default");
        let tenant = base.for_database("tenant_b");

        assert_eq!(tenant.database.as_deref(), Some("tenant_b"));
        assert_eq!(tenant.username.as_deref(), Some("root"));
        assert_eq!(base.database.as_deref(), Some("default"));
        assert!(tenant.is_secure());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = ConnectConfig::default()
            .with_token("tok-123")
            .with_credentials("root", "hunter2");
        let debug = format!("{:?}", config);
        assert!(!debug.contains("tok-123"));
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("root"));
    }

    #[test]
    fn test_connect_config_serialization() {
        let config = ConnectConfig::new("http://10.0.0.5:19530")
            .with_database("db1")
            .with_tls(TlsConfig {
                server_name: Some("vdb".into()),
                ..Default::default()
            })
            .with_param("retry", "3");

        let json = serde_json::to_string(&config).expect("serialize");
        let back: ConnectConfig = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.database.as_deref(), Some("db1"));
        assert_eq!(back.params.get("retry").map(String::as_str), Some("3"));
        assert!(back.tls.is_some_and(|tls| !tls.is_mutual()));
    }
}

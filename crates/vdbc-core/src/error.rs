//! Error types for VDBC

use std::time::Duration;

use thiserror::Error;

/// Boxed error produced by a [`ClientFactory`](crate::ClientFactory)
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Core error type for pool operations
#[derive(Error, Debug)]
pub enum PoolError {
    /// No handle became available for `key` before the wait limit elapsed
    #[error("Timed out after {waited:?} waiting for a client for key '{key}'")]
    Exhausted { key: String, waited: Duration },

    /// The client factory failed to construct a handle
    #[error("Failed to create client for key '{key}': {source}")]
    Creation {
        key: String,
        #[source]
        source: BoxError,
    },

    /// The client factory failed to close a handle
    #[error("Failed to destroy client for key '{key}': {source}")]
    Destroy {
        key: String,
        #[source]
        source: BoxError,
    },

    /// The sub-pool for a key was removed while the operation was in flight
    #[error("Key '{0}' was cleared during the operation")]
    InvalidKeyState(String),

    #[error("Pool is closed")]
    Closed,

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl PoolError {
    /// Whether the caller may reasonably retry the operation.
    ///
    /// Only capacity exhaustion is retryable; creation failures are surfaced
    /// as-is so the caller decides.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PoolError::Exhausted { .. })
    }

    /// Key the error relates to, if any
    pub fn key(&self) -> Option<&str> {
        match self {
            PoolError::Exhausted { key, .. }
            | PoolError::Creation { key, .. }
            | PoolError::Destroy { key, .. } => Some(key),
            PoolError::InvalidKeyState(key) => Some(key),
            PoolError::Closed | PoolError::Configuration(_) => None,
        }
    }
}

/// Result type alias for pool operations
pub type Result<T> = std::result::Result<T, PoolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhausted_is_retryable() {
        let err = PoolError::Exhausted {
            key: "tenant_a".into(),
            waited: Duration::from_millis(200),
        };
        assert!(err.is_retryable());
        assert_eq!(err.key(), Some("tenant_a"));
        assert!(err.to_string().contains("Timed out"));
    }

    #[test]
    fn test_creation_is_not_retryable() {
        let err = PoolError::Creation {
            key: "db1".into(),
            source: "connection refused".into(),
        };
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("connection refused"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_closed_has_no_key() {
        assert_eq!(PoolError::Closed.key(), None);
        assert_eq!(PoolError::Closed.to_string(), "Pool is closed");
    }
}

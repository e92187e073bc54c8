//! Client factory trait

use std::sync::Arc;

use async_trait::async_trait;

use crate::BoxError;

/// Factory for creating and tearing down remote-service client handles.
///
/// The pool never inspects a client; it only asks the factory to build one for a
/// given configuration and to close it again. Implementations must be safe to
/// call concurrently, and `create` may be slow (a network dial).
#[async_trait]
pub trait ClientFactory: Send + Sync + 'static {
    /// The pooled client handle
    type Client: Send + Sync + 'static;

    /// Per-key connection parameters handed to `create`
    type Config: Clone + Send + Sync + 'static;

    /// Create a new client for the given configuration
    async fn create(&self, config: &Self::Config) -> Result<Self::Client, BoxError>;

    /// Close a client. Errors are logged by the pool and otherwise ignored.
    async fn destroy(&self, client: Self::Client) -> Result<(), BoxError>;

    /// Validate that a client is still usable
    ///
    /// Only consulted when the pool is configured with `test_on_borrow` or
    /// `test_on_return`. Default implementation always returns true.
    async fn validate(&self, _client: &Self::Client) -> bool {
        true
    }
}

#[async_trait]
impl<T: ClientFactory> ClientFactory for Arc<T> {
    type Client = T::Client;
    type Config = T::Config;

    async fn create(&self, config: &Self::Config) -> Result<Self::Client, BoxError> {
        (**self).create(config).await
    }

    async fn destroy(&self, client: Self::Client) -> Result<(), BoxError> {
        (**self).destroy(client).await
    }

    async fn validate(&self, client: &Self::Client) -> bool {
        (**self).validate(client).await
    }
}

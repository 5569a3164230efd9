//! Adapter cache: one live [`S3Adapter`] per storage configuration.
//!
//! Adapters idle longer than the configured timeout (30 minutes by default)
//! are evicted and closed, releasing their SDK client. An adapter still held
//! by a running command or an unfinished multipart upload counts as in use
//! and stays cached.

use super::api::S3Connector;
use super::client::S3Adapter;
use super::config::StorageConfig;
use super::error::S3Result;
use super::recovery::RetryPolicy;
use async_trait::async_trait;
use orbit_core_resilience::{ClientHealthConfig, EvictionListener, IdleCache};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Default idle time before an adapter is evicted
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

struct CloseOnEvict;

#[async_trait]
impl EvictionListener<StorageConfig, Arc<S3Adapter>> for CloseOnEvict {
    async fn on_evict(&self, config: StorageConfig, adapter: Arc<S3Adapter>) {
        debug!(bucket = %config.bucket(), "Evicting idle S3 adapter");
        adapter.close().await;
    }
}

/// Thread-safe adapter cache keyed by [`StorageConfig`]
pub struct S3AdapterCache {
    cache: IdleCache<StorageConfig, Arc<S3Adapter>>,
    connector: Arc<dyn S3Connector>,
    health_config: ClientHealthConfig,
    read_retry: RetryPolicy,
}

impl S3AdapterCache {
    pub fn new(connector: Arc<dyn S3Connector>, idle_timeout: Duration) -> Self {
        Self {
            cache: IdleCache::new(idle_timeout)
                .with_listener(Arc::new(CloseOnEvict))
                .with_in_use_check(Arc::new(|adapter: &Arc<S3Adapter>| {
                    Arc::strong_count(adapter) > 1
                })),
            connector,
            health_config: ClientHealthConfig::default(),
            read_retry: RetryPolicy::read(),
        }
    }

    /// Health settings for adapters created from now on
    pub fn with_health_config(mut self, health_config: ClientHealthConfig) -> Self {
        self.health_config = health_config;
        self
    }

    /// Read retry policy for adapters created from now on
    pub fn with_read_retry(mut self, policy: RetryPolicy) -> Self {
        self.read_retry = policy;
        self
    }

    /// Get the adapter for `config`, creating it if needed.
    ///
    /// Concurrent callers with equal configs receive the same adapter.
    pub async fn get_or_create(&self, config: &StorageConfig) -> S3Result<Arc<S3Adapter>> {
        self.cache
            .get_or_try_insert_with(config.clone(), || {
                let factory = self.connector.client_factory(config)?;
                debug!(bucket = %config.bucket(), "Creating S3 adapter");
                let adapter = S3Adapter::new(config.clone(), factory, self.health_config)
                    .with_read_retry(self.read_retry.clone());
                Ok(Arc::new(adapter))
            })
            .await
    }

    /// Evict and close adapters idle past the timeout; returns how many
    pub async fn evict_idle(&self) -> usize {
        self.cache.evict_idle().await
    }

    /// Drop and close the adapter for `config`
    pub async fn invalidate(&self, config: &StorageConfig) -> bool {
        self.cache.invalidate(config).await.is_some()
    }

    /// Drop and close every adapter
    pub async fn clear(&self) {
        self.cache.clear().await;
    }

    /// Number of cached adapters
    pub async fn len(&self) -> usize {
        self.cache.len().await
    }

    /// Check if the cache is empty
    pub async fn is_empty(&self) -> bool {
        self.cache.is_empty().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{InMemoryConnector, InMemoryObjectStore};

    fn config(bucket: &str) -> StorageConfig {
        StorageConfig::builder(bucket)
            .credentials("key", "secret")
            .build()
            .unwrap()
    }

    fn cache(connector: &Arc<InMemoryConnector>) -> S3AdapterCache {
        S3AdapterCache::new(connector.clone(), DEFAULT_IDLE_TIMEOUT)
    }

    #[tokio::test]
    async fn test_cache_reuses_adapter() {
        let connector = Arc::new(InMemoryConnector::new(InMemoryObjectStore::new()));
        let cache = cache(&connector);

        let a = cache.get_or_create(&config("bucket-a")).await.unwrap();
        let b = cache.get_or_create(&config("bucket-a")).await.unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len().await, 1);
        assert_eq!(connector.factories_built(), 1);
    }

    #[tokio::test]
    async fn test_cache_different_configs() {
        let connector = Arc::new(InMemoryConnector::new(InMemoryObjectStore::new()));
        let cache = cache(&connector);

        cache.get_or_create(&config("bucket-a")).await.unwrap();
        cache.get_or_create(&config("bucket-b")).await.unwrap();

        assert_eq!(cache.len().await, 2);
    }

    #[tokio::test]
    async fn test_connector_failure_not_cached() {
        let connector = Arc::new(InMemoryConnector::new(InMemoryObjectStore::new()));
        connector.set_refuse_configs(true);
        let cache = cache(&connector);

        assert!(cache.get_or_create(&config("bucket-a")).await.is_err());
        assert!(cache.is_empty().await);

        connector.set_refuse_configs(false);
        assert!(cache.get_or_create(&config("bucket-a")).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_adapter_evicted_and_closed() {
        let connector = Arc::new(InMemoryConnector::new(InMemoryObjectStore::new()));
        let cache = cache(&connector);

        let adapter = cache.get_or_create(&config("bucket-a")).await.unwrap();
        adapter.exists("warm-up").await.unwrap();
        let evicted = Arc::downgrade(&adapter);
        drop(adapter);
        assert_eq!(connector.clients_closed(), 0);

        tokio::time::advance(DEFAULT_IDLE_TIMEOUT + Duration::from_secs(1)).await;
        assert_eq!(cache.evict_idle().await, 1);

        assert!(cache.is_empty().await);
        assert_eq!(connector.clients_closed(), 1);
        assert!(evicted.upgrade().is_none());

        cache.get_or_create(&config("bucket-a")).await.unwrap();
        assert_eq!(connector.factories_built(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_adapter_in_use_not_evicted() {
        let connector = Arc::new(InMemoryConnector::new(InMemoryObjectStore::new()));
        let cache = cache(&connector);

        let held = cache.get_or_create(&config("bucket-a")).await.unwrap();
        held.exists("warm-up").await.unwrap();

        tokio::time::advance(DEFAULT_IDLE_TIMEOUT + Duration::from_secs(1)).await;
        assert_eq!(cache.evict_idle().await, 0);
        assert_eq!(connector.clients_closed(), 0);
        assert!(held.exists("still-usable").await.is_ok());

        drop(held);
        tokio::time::advance(DEFAULT_IDLE_TIMEOUT + Duration::from_secs(1)).await;
        assert_eq!(cache.evict_idle().await, 1);
        assert_eq!(connector.clients_closed(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_closes_adapter() {
        let connector = Arc::new(InMemoryConnector::new(InMemoryObjectStore::new()));
        let cache = cache(&connector);

        let adapter = cache.get_or_create(&config("bucket-a")).await.unwrap();
        adapter.exists("warm-up").await.unwrap();

        assert!(cache.invalidate(&config("bucket-a")).await);
        assert!(!cache.invalidate(&config("bucket-a")).await);
        assert_eq!(connector.clients_closed(), 1);
    }
}

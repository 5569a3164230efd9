//! S3 adapter bound to one storage location

use super::api::ObjectStoreApi;
use super::config::StorageConfig;
use super::error::S3Result;
use super::recovery::{with_retry, RetryPolicy};
use super::types::{ObjectHead, ReadHandle};
use orbit_core_resilience::{ClientFactory, ClientHealthConfig, ClientHealthManager};
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// Adapter for one [`StorageConfig`]: runs every S3 call through a
/// [`ClientHealthManager`] so a client that keeps failing is rebuilt.
///
/// Multipart and listing operations live in [`super::multipart`] and
/// [`super::operations`].
pub struct S3Adapter {
    config: StorageConfig,
    health: ClientHealthManager<dyn ObjectStoreApi>,
    read_retry: RetryPolicy,
}

impl S3Adapter {
    /// Create an adapter; the SDK client is built on first use
    pub fn new(
        config: StorageConfig,
        factory: Arc<dyn ClientFactory<dyn ObjectStoreApi>>,
        health_config: ClientHealthConfig,
    ) -> Self {
        Self {
            config,
            health: ClientHealthManager::new(factory, health_config),
            read_retry: RetryPolicy::read(),
        }
    }

    /// Replace the retry policy used by [`read`](Self::read)
    pub fn with_read_retry(mut self, policy: RetryPolicy) -> Self {
        self.read_retry = policy;
        self
    }

    /// Get a reference to the configuration
    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Get the bucket name
    pub fn bucket(&self) -> &str {
        self.config.bucket()
    }

    /// Consecutive transport failures seen by the live client
    pub async fn consecutive_failures(&self) -> u32 {
        self.health.consecutive_failures().await
    }

    /// Instance id of the live client, if one has been built
    pub async fn current_client_id(&self) -> Option<u64> {
        self.health.current_client_id().await
    }

    /// Release the live client; later calls fail with
    /// [`S3Error::ClientUnavailable`](super::S3Error::ClientUnavailable)
    pub async fn close(&self) {
        debug!(bucket = %self.bucket(), "Closing S3 adapter");
        self.health.close().await;
    }

    /// Run one call against the live client, tracking its outcome
    pub(crate) async fn call<F, Fut, R>(&self, action: F) -> S3Result<R>
    where
        F: FnOnce(Arc<dyn ObjectStoreApi>) -> Fut,
        Fut: Future<Output = S3Result<R>>,
    {
        self.health.with_client(action).await
    }

    /// Check if an object exists in the bucket
    pub async fn exists(&self, key: &str) -> S3Result<bool> {
        match self.head(key).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// HEAD an object
    pub async fn head(&self, key: &str) -> S3Result<ObjectHead> {
        let bucket = self.bucket();
        self.call(move |client| async move { client.head_object(bucket, key).await })
            .await
    }

    /// ETag of an object with quotes stripped, `None` if it does not exist
    pub async fn e_tag(&self, key: &str) -> S3Result<Option<String>> {
        match self.head(key).await {
            Ok(head) => Ok(head.e_tag),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Size of an object, `None` if it does not exist
    pub async fn content_length(&self, key: &str) -> S3Result<Option<u64>> {
        match self.head(key).await {
            Ok(head) => Ok(head.content_length),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Open an object for reading.
    ///
    /// Transport failures are retried per the read policy; a missing object
    /// is returned at once as [`S3Error::NotFound`](super::S3Error::NotFound).
    pub async fn read(&self, key: &str) -> S3Result<ReadHandle> {
        let bucket = self.bucket();
        let object = with_retry(&self.read_retry, "read", move || {
            self.call(move |client| async move { client.get_object(bucket, key).await })
        })
        .await?;

        debug!(
            bucket,
            key,
            content_length = ?object.content_length,
            "Opened object for reading"
        );
        Ok(ReadHandle::new(key, object))
    }
}

impl std::fmt::Debug for S3Adapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Adapter")
            .field("config", &self.config)
            .field("read_retry", &self.read_retry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::s3::S3Error;
    use crate::testing::{InMemoryClientFactory, InMemoryObjectStore, Op};
    use bytes::Bytes;

    fn config() -> StorageConfig {
        StorageConfig::builder("test-bucket")
            .credentials("key", "secret")
            .build()
            .unwrap()
    }

    fn adapter(store: &InMemoryObjectStore) -> (S3Adapter, Arc<InMemoryClientFactory>) {
        let factory = Arc::new(InMemoryClientFactory::new(store.clone()));
        let adapter = S3Adapter::new(config(), factory.clone(), ClientHealthConfig::default())
            .with_read_retry(RetryPolicy::none());
        (adapter, factory)
    }

    #[tokio::test]
    async fn test_exists() {
        let store = InMemoryObjectStore::new();
        store.insert("test-bucket", "present", Bytes::from_static(b"x"));
        let (adapter, _) = adapter(&store);

        assert!(adapter.exists("present").await.unwrap());
        assert!(!adapter.exists("absent").await.unwrap());
    }

    #[tokio::test]
    async fn test_exists_propagates_transport_errors() {
        let store = InMemoryObjectStore::new();
        store.fail_always(Op::Head, S3Error::Network("down".to_string()));
        let (adapter, _) = adapter(&store);

        assert!(matches!(
            adapter.exists("any").await,
            Err(S3Error::Network(_))
        ));
        assert_eq!(adapter.consecutive_failures().await, 1);
    }

    #[tokio::test]
    async fn test_e_tag_and_content_length() {
        let store = InMemoryObjectStore::new();
        store.insert("test-bucket", "blob", Bytes::from_static(b"hello"));
        let (adapter, _) = adapter(&store);

        let e_tag = adapter.e_tag("blob").await.unwrap().unwrap();
        assert!(!e_tag.contains('"'));
        assert_eq!(e_tag, format!("{:x}", md5::compute(b"hello")));
        assert_eq!(adapter.content_length("blob").await.unwrap(), Some(5));

        assert_eq!(adapter.e_tag("missing").await.unwrap(), None);
        assert_eq!(adapter.content_length("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_read() {
        let store = InMemoryObjectStore::new();
        store.insert("test-bucket", "blob", Bytes::from_static(b"payload"));
        let (adapter, _) = adapter(&store);

        let handle = adapter.read("blob").await.unwrap();
        assert_eq!(handle.content_length(), Some(7));
        assert_eq!(handle.collect().await.unwrap(), Bytes::from_static(b"payload"));
    }

    #[tokio::test]
    async fn test_read_not_found_not_retried() {
        let store = InMemoryObjectStore::new();
        let (adapter, _) = adapter(&store);
        let adapter = adapter.with_read_retry(RetryPolicy::read());

        let err = adapter.read("missing").await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(store.count(Op::Get), 1);
        assert_eq!(adapter.consecutive_failures().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_retries_transport_errors() {
        let store = InMemoryObjectStore::new();
        store.insert("test-bucket", "blob", Bytes::from_static(b"data"));
        store.fail_times(Op::Get, S3Error::Timeout("slow".to_string()), 3);
        let (adapter, _) = adapter(&store);
        let adapter = adapter.with_read_retry(RetryPolicy::read());

        let handle = adapter.read("blob").await.unwrap();
        assert_eq!(handle.collect().await.unwrap(), Bytes::from_static(b"data"));
        assert_eq!(store.count(Op::Get), 4);
        // success on the same client resets the counter
        assert_eq!(adapter.consecutive_failures().await, 0);
    }

    #[tokio::test]
    async fn test_client_rebuilt_after_repeated_failures() {
        let store = InMemoryObjectStore::new();
        store.fail_times(Op::Head, S3Error::Network("reset".to_string()), 4);
        let (adapter, factory) = adapter(&store);

        for _ in 0..4 {
            assert!(adapter.exists("k").await.is_err());
        }
        assert_eq!(adapter.consecutive_failures().await, 0);
        assert_eq!(factory.closed(), 1);

        assert!(!adapter.exists("k").await.unwrap());
        assert_eq!(adapter.current_client_id().await, Some(2));
        assert_eq!(factory.created(), 2);
    }

    #[tokio::test]
    async fn test_close() {
        let store = InMemoryObjectStore::new();
        let (adapter, factory) = adapter(&store);

        adapter.exists("k").await.unwrap();
        adapter.close().await;

        assert_eq!(factory.closed(), 1);
        assert!(matches!(
            adapter.exists("k").await,
            Err(S3Error::ClientUnavailable(_))
        ));
    }
}

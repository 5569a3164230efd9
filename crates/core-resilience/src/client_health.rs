//! Self-healing holder for a long-lived client instance
//!
//! A [`ClientHealthManager`] owns one live client built by a
//! [`ClientFactory`]. Every operation runs through
//! [`ClientHealthManager::with_client`], which watches the outcome:
//! - success resets the consecutive failure counter
//! - an error classified as instability ([`FailureClass::is_instability`])
//!   increments it
//! - once the counter exceeds the configured maximum, the client is closed
//!   and discarded and the next call builds a fresh one
//!
//! Each client carries an instance id. Outcomes observed on an instance that
//! has already been replaced are ignored, so a burst of late failures from
//! the old client never counts against its successor.

use super::error::ResilienceError;
use std::fmt::{self, Debug, Display};
use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Classifies an operation error for health tracking
pub trait FailureClass {
    /// Whether the error indicates the client itself may be broken
    /// (network, timeout, protocol). Domain outcomes such as "not found"
    /// must return `false`.
    fn is_instability(&self) -> bool;
}

impl FailureClass for ResilienceError {
    fn is_instability(&self) -> bool {
        false
    }
}

/// Factory trait for building and releasing clients
#[async_trait::async_trait]
pub trait ClientFactory<T: ?Sized + Send + Sync + 'static>: Send + Sync {
    /// Build a new client
    async fn create(&self) -> Result<Arc<T>, ResilienceError>;

    /// Release a client that is being discarded (optional cleanup)
    async fn close(&self, client: Arc<T>) {
        drop(client);
    }
}

/// Configuration for client health tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientHealthConfig {
    /// Number of consecutive instability errors tolerated before the
    /// client is replaced (replacement happens when this is exceeded)
    pub max_consecutive_failures: u32,
}

impl Default for ClientHealthConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 3,
        }
    }
}

/// A client handed out by the manager, tagged with its instance id
pub struct ClientLease<T: ?Sized> {
    id: u64,
    client: Arc<T>,
}

impl<T: ?Sized> ClientLease<T> {
    /// Monotonically increasing instance id of the leased client
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Shared handle to the client
    pub fn client(&self) -> Arc<T> {
        Arc::clone(&self.client)
    }
}

impl<T: ?Sized> Clone for ClientLease<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            client: Arc::clone(&self.client),
        }
    }
}

impl<T: ?Sized> Deref for ClientLease<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.client
    }
}

impl<T: ?Sized> Debug for ClientLease<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientLease").field("id", &self.id).finish()
    }
}

struct HealthState<T: ?Sized> {
    current: Option<ClientLease<T>>,
    consecutive_failures: u32,
    next_id: u64,
    closed: bool,
}

/// Keeps one client alive and replaces it after repeated instability
pub struct ClientHealthManager<T: ?Sized + Send + Sync + 'static> {
    config: ClientHealthConfig,
    factory: Arc<dyn ClientFactory<T>>,
    state: Mutex<HealthState<T>>,
}

impl<T: ?Sized + Send + Sync + 'static> ClientHealthManager<T> {
    /// Create a manager; no client is built until first use
    pub fn new(factory: Arc<dyn ClientFactory<T>>, config: ClientHealthConfig) -> Self {
        Self {
            config,
            factory,
            state: Mutex::new(HealthState {
                current: None,
                consecutive_failures: 0,
                next_id: 0,
                closed: false,
            }),
        }
    }

    /// Create a manager with default configuration
    pub fn new_default(factory: Arc<dyn ClientFactory<T>>) -> Self {
        Self::new(factory, ClientHealthConfig::default())
    }

    /// Get the live client, building one if none exists.
    ///
    /// Creation happens under the state lock so concurrent callers share a
    /// single new instance.
    pub async fn lease(&self) -> Result<ClientLease<T>, ResilienceError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(ResilienceError::Closed);
        }
        if let Some(lease) = &state.current {
            return Ok(lease.clone());
        }

        let client = self.factory.create().await?;
        state.next_id += 1;
        let lease = ClientLease {
            id: state.next_id,
            client,
        };
        debug!(client_id = lease.id, "Created client");
        state.current = Some(lease.clone());
        Ok(lease)
    }

    /// Run `action` against the live client and record its outcome.
    ///
    /// The action's result is returned unchanged. A failure to build the
    /// client is converted into `E` and is not counted.
    pub async fn with_client<F, Fut, R, E>(&self, action: F) -> Result<R, E>
    where
        F: FnOnce(Arc<T>) -> Fut,
        Fut: Future<Output = Result<R, E>>,
        E: FailureClass + From<ResilienceError> + Display,
    {
        let lease = self.lease().await?;
        let client_id = lease.id;
        let outcome = action(lease.client).await;

        let verdict = match &outcome {
            Ok(_) => Verdict::Success,
            Err(e) if e.is_instability() => Verdict::Instability(e.to_string()),
            Err(_) => Verdict::Domain,
        };
        match verdict {
            Verdict::Success => self.record_success(client_id).await,
            Verdict::Instability(reason) => self.record_failure(client_id, &reason).await,
            Verdict::Domain => {}
        }

        outcome
    }

    /// Reset the failure counter if `client_id` is still the live instance
    pub async fn record_success(&self, client_id: u64) {
        let mut state = self.state.lock().await;
        if current_id(&*state) == Some(client_id) {
            state.consecutive_failures = 0;
        }
    }

    /// Count an instability error observed on `client_id`
    pub async fn record_failure(&self, client_id: u64, reason: &str) {
        let retired = {
            let mut state = self.state.lock().await;
            if current_id(&*state) != Some(client_id) {
                debug!(
                    client_id,
                    error = reason,
                    "Ignoring failure from a replaced client"
                );
                return;
            }

            state.consecutive_failures += 1;
            warn!(
                client_id,
                consecutive_failures = state.consecutive_failures,
                error = reason,
                "Client operation failed"
            );

            if state.consecutive_failures > self.config.max_consecutive_failures {
                state.consecutive_failures = 0;
                state.current.take()
            } else {
                None
            }
        };

        if let Some(lease) = retired {
            warn!(
                client_id = lease.id,
                max_consecutive_failures = self.config.max_consecutive_failures,
                "Replacing unstable client"
            );
            self.factory.close(lease.client).await;
        }
    }

    /// Current consecutive failure count
    pub async fn consecutive_failures(&self) -> u32 {
        self.state.lock().await.consecutive_failures
    }

    /// Instance id of the live client, if one has been built
    pub async fn current_client_id(&self) -> Option<u64> {
        current_id(&*self.state.lock().await)
    }

    /// Release the live client; later calls fail with [`ResilienceError::Closed`]
    pub async fn close(&self) {
        let retired = {
            let mut state = self.state.lock().await;
            state.closed = true;
            state.consecutive_failures = 0;
            state.current.take()
        };

        if let Some(lease) = retired {
            debug!(client_id = lease.id, "Closing client");
            self.factory.close(lease.client).await;
        }
    }

    /// Whether [`close`](Self::close) has been called
    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }

    /// Get configuration
    pub fn config(&self) -> &ClientHealthConfig {
        &self.config
    }
}

enum Verdict {
    Success,
    Instability(String),
    Domain,
}

fn current_id<T: ?Sized>(state: &HealthState<T>) -> Option<u64> {
    state.current.as_ref().map(|lease| lease.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct TestClient {
        serial: usize,
    }

    #[derive(Default)]
    struct TestFactory {
        created: AtomicUsize,
        closed: AtomicUsize,
        fail_creation: bool,
    }

    #[async_trait::async_trait]
    impl ClientFactory<TestClient> for TestFactory {
        async fn create(&self) -> Result<Arc<TestClient>, ResilienceError> {
            if self.fail_creation {
                return Err(ResilienceError::ClientCreation("refused".to_string()));
            }
            let serial = self.created.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Arc::new(TestClient { serial }))
        }

        async fn close(&self, _client: Arc<TestClient>) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Debug)]
    enum TestError {
        Network,
        Missing,
        Resilience(ResilienceError),
    }

    impl Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{:?}", self)
        }
    }

    impl FailureClass for TestError {
        fn is_instability(&self) -> bool {
            matches!(self, TestError::Network)
        }
    }

    impl From<ResilienceError> for TestError {
        fn from(e: ResilienceError) -> Self {
            TestError::Resilience(e)
        }
    }

    fn manager(factory: Arc<TestFactory>, max: u32) -> ClientHealthManager<TestClient> {
        ClientHealthManager::new(
            factory,
            ClientHealthConfig {
                max_consecutive_failures: max,
            },
        )
    }

    async fn fail(mgr: &ClientHealthManager<TestClient>) {
        let _ = mgr
            .with_client(|_| async { Err::<(), _>(TestError::Network) })
            .await;
    }

    #[tokio::test]
    async fn test_client_created_lazily_and_reused() {
        let factory = Arc::new(TestFactory::default());
        let mgr = manager(factory.clone(), 3);

        assert_eq!(mgr.current_client_id().await, None);
        assert_eq!(factory.created.load(Ordering::SeqCst), 0);

        for _ in 0..5 {
            let serial = mgr
                .with_client(|c| async move { Ok::<_, TestError>(c.serial) })
                .await
                .unwrap();
            assert_eq!(serial, 1);
        }

        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
        assert_eq!(mgr.current_client_id().await, Some(1));
    }

    #[tokio::test]
    async fn test_replacement_after_exceeding_max_failures() {
        let factory = Arc::new(TestFactory::default());
        let mgr = manager(factory.clone(), 3);

        for expected in 1..=3 {
            fail(&mgr).await;
            assert_eq!(mgr.consecutive_failures().await, expected);
            assert_eq!(mgr.current_client_id().await, Some(1));
        }

        // Fourth failure exceeds the maximum
        fail(&mgr).await;
        assert_eq!(mgr.consecutive_failures().await, 0);
        assert_eq!(mgr.current_client_id().await, None);
        assert_eq!(factory.closed.load(Ordering::SeqCst), 1);

        let lease = mgr.lease().await.unwrap();
        assert_eq!(lease.id(), 2);
        assert_eq!(lease.serial, 2);
    }

    #[tokio::test]
    async fn test_success_resets_counter() {
        let factory = Arc::new(TestFactory::default());
        let mgr = manager(factory, 3);

        fail(&mgr).await;
        fail(&mgr).await;
        assert_eq!(mgr.consecutive_failures().await, 2);

        mgr.with_client(|_| async { Ok::<_, TestError>(()) })
            .await
            .unwrap();
        assert_eq!(mgr.consecutive_failures().await, 0);
    }

    #[tokio::test]
    async fn test_domain_errors_not_counted() {
        let factory = Arc::new(TestFactory::default());
        let mgr = manager(factory, 1);

        for _ in 0..10 {
            let result = mgr
                .with_client(|_| async { Err::<(), _>(TestError::Missing) })
                .await;
            assert!(matches!(result, Err(TestError::Missing)));
        }

        assert_eq!(mgr.consecutive_failures().await, 0);
        assert_eq!(mgr.current_client_id().await, Some(1));
    }

    #[tokio::test]
    async fn test_stale_failure_ignored() {
        let factory = Arc::new(TestFactory::default());
        let mgr = manager(factory, 0);

        let old = mgr.lease().await.unwrap();
        fail(&mgr).await;
        assert_eq!(mgr.current_client_id().await, None);

        let new = mgr.lease().await.unwrap();
        assert_ne!(old.id(), new.id());

        // A late failure from the retired instance must not touch the new one
        mgr.record_failure(old.id(), "late timeout").await;
        assert_eq!(mgr.consecutive_failures().await, 0);
        assert_eq!(mgr.current_client_id().await, Some(new.id()));
    }

    #[tokio::test]
    async fn test_creation_failure_returned_as_error() {
        let factory = Arc::new(TestFactory {
            fail_creation: true,
            ..Default::default()
        });
        let mgr = manager(factory, 3);

        let result = mgr
            .with_client(|_| async { Ok::<_, TestError>(()) })
            .await;
        assert!(matches!(
            result,
            Err(TestError::Resilience(ResilienceError::ClientCreation(_)))
        ));
        assert_eq!(mgr.consecutive_failures().await, 0);
    }

    #[tokio::test]
    async fn test_close() {
        let factory = Arc::new(TestFactory::default());
        let mgr = manager(factory.clone(), 3);

        mgr.lease().await.unwrap();
        mgr.close().await;

        assert!(mgr.is_closed().await);
        assert_eq!(factory.closed.load(Ordering::SeqCst), 1);
        assert!(matches!(mgr.lease().await, Err(ResilienceError::Closed)));
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_client() {
        let factory = Arc::new(TestFactory::default());
        let mgr = Arc::new(manager(factory.clone(), 3));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let mgr = mgr.clone();
            handles.push(tokio::spawn(async move { mgr.lease().await.unwrap().id() }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), 1);
        }
        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
    }
}

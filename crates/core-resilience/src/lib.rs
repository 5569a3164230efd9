//! Orbit Core Resilience: Pure-logic fault tolerance primitives
//!
//! # Overview
//!
//! This crate provides the building blocks Orbit's storage clients use to
//! survive transient failures in external services:
//!
//! - **Client Health Manager**: keeps one long-lived client alive, counts
//!   consecutive instability errors and rebuilds the client once a threshold
//!   is exceeded
//! - **Idle Cache**: keyed cache with atomic get-or-create whose entries are
//!   evicted after a period without access
//!
//! # Key Principles
//!
//! This crate is **pure logic** with zero knowledge of:
//! - Storage systems (databases, file systems)
//! - Network protocols (S3, SMB, HTTP)
//! - Application-specific concerns
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         Your Application                │
//! └─────────────┬───────────────────────────┘
//!               │ get_or_try_insert_with(config)
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Idle Cache                        │  ← One handle per key
//! │  (Evicts entries idle past timeout)     │
//! └─────────────┬───────────────────────────┘
//!               │ with_client(action)
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Client Health Manager             │  ← Self-healing client
//! │  (Counts failures, rebuilds on limit)   │
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//!         External Service
//!        (S3, SMB, Database)
//! ```
//!
//! # Usage Example
//!
//! ```no_run
//! use orbit_core_resilience::{
//!     ClientFactory, ClientHealthConfig, ClientHealthManager, ResilienceError,
//! };
//! use std::sync::Arc;
//!
//! struct MyClient;
//! struct MyFactory;
//!
//! #[async_trait::async_trait]
//! impl ClientFactory<MyClient> for MyFactory {
//!     async fn create(&self) -> Result<Arc<MyClient>, ResilienceError> {
//!         Ok(Arc::new(MyClient))
//!     }
//! }
//!
//! # async fn example() -> Result<(), ResilienceError> {
//! let manager = ClientHealthManager::new(Arc::new(MyFactory), ClientHealthConfig::default());
//!
//! let answer = manager
//!     .with_client(|_client| async { Ok::<_, ResilienceError>(42) })
//!     .await?;
//! assert_eq!(answer, 42);
//! # Ok(())
//! # }
//! ```

pub mod client_health;
pub mod error;
pub mod idle_cache;

// Re-export main types for convenience
pub use client_health::{
    ClientFactory, ClientHealthConfig, ClientHealthManager, ClientLease, FailureClass,
};
pub use error::ResilienceError;
pub use idle_cache::{EvictionListener, IdleCache, InUseCheck};

/// Prelude module for convenient imports
///
/// # Example
/// ```
/// use orbit_core_resilience::prelude::*;
/// ```
pub mod prelude {
    pub use super::client_health::{ClientFactory, ClientHealthManager, FailureClass};
    pub use super::error::ResilienceError;
    pub use super::idle_cache::{EvictionListener, IdleCache};
}

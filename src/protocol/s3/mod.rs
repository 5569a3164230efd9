//! S3 protocol layer for orbit-storage
//!
//! This module talks to S3 and S3-compatible services (MinIO, LocalStack)
//! through the official AWS SDK for Rust. Everything above the SDK goes
//! through the narrow [`ObjectStoreApi`] trait, so the same adapter logic
//! runs against the in-memory store in `crate::testing` (feature `testing`).
//!
//! # Layers
//!
//! - [`S3Adapter`]: one per [`StorageConfig`]; exists/read/put, multipart
//!   primitives, list and delete. Every call runs through a
//!   [`orbit_core_resilience::ClientHealthManager`] that rebuilds the SDK
//!   client after repeated transport failures.
//! - [`S3AdapterCache`]: one live adapter per configuration, evicted after
//!   30 idle minutes.
//! - [`rechunk`]: repacks a byte stream into fixed-size multipart parts.
//! - [`recovery`]: retry policies with capped exponential backoff.
//! - Archived objects: [`S3Adapter::restore`] and
//!   [`S3Adapter::availability`], driven by the `x-amz-restore` header.
//!
//! # Example
//!
//! ```ignore
//! use orbit_storage::protocol::s3::{AwsConnector, S3AdapterCache, StorageConfig, DEFAULT_IDLE_TIMEOUT};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = StorageConfig::builder("my-bucket")
//!         .endpoint("http://localhost:9000")
//!         .credentials("minioadmin", "minioadmin")
//!         .force_path_style(true)
//!         .build()?;
//!
//!     let cache = S3AdapterCache::new(
//!         Arc::new(AwsConnector::new(Duration::from_secs(300))),
//!         DEFAULT_IDLE_TIMEOUT,
//!     );
//!     let adapter = cache.get_or_create(&config).await?;
//!     println!("exists: {}", adapter.exists("reports/2024.csv").await?);
//!
//!     Ok(())
//! }
//! ```

mod api;
mod cache;
mod chunker;
mod client;
mod config;
mod error;
mod multipart;
mod operations;
pub mod recovery;
mod restore;
mod sdk;
mod types;

pub use api::{ObjectStoreApi, S3Connector};
pub use cache::{S3AdapterCache, DEFAULT_IDLE_TIMEOUT};
pub use chunker::rechunk;
pub use client::S3Adapter;
pub use config::{
    StorageConfig, StorageConfigBuilder, DEFAULT_SDK_BACKOFF_BASE_SECS, DEFAULT_SDK_BACKOFF_MAX_SECS,
    DEFAULT_SDK_MAX_RETRIES,
};
pub use error::{S3Error, S3Result};
pub use multipart::{MultipartSession, MAX_PART_NUMBER};
pub use operations::content_md5;
pub use recovery::{BackoffStrategy, RetryPolicy};
pub use restore::{
    is_standard_storage_class, restore_state, FileAvailability, RestorationStatus,
    DEFAULT_STANDARD_STORAGE_CLASS,
};
pub use sdk::{AwsClientFactory, AwsConnector, AwsObjectStore};
pub use types::{
    BodyStream, MultipartReport, ObjectBody, ObjectHead, ObjectPage, ReadHandle, UploadedPart,
};

/// Minimum multipart part size accepted by S3 (5 MiB), last part excepted
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Default multipart part size
pub const DEFAULT_PART_SIZE: usize = MIN_PART_SIZE;

/// Default number of chunks buffered and parts uploaded concurrently
pub const DEFAULT_PREFETCH: usize = 4;

/// Upper bound for the prefetch depth
pub const MAX_PREFETCH: usize = 16;

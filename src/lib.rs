/*!
 * orbit-storage - resilient streaming S3 storage client
 *
 * - Read, write, delete and check commands with typed results
 * - Streaming multipart uploads with bounded concurrency, aborted on failure
 * - Self-healing SDK clients rebuilt after repeated transport failures
 * - One cached client per storage configuration, evicted when idle
 * - Retry with capped exponential backoff for reads and deletes
 */

pub mod config;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod storage;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export commonly used types
pub use config::{LogLevel, LogSettings, RetrySettings, StorageClientSettings};
pub use error::{OrbitError, Result};
pub use protocol::s3::{S3Error, S3Result, StorageConfig};
pub use storage::{
    Check, Checksum, CommandId, Delete, Read, StorageClient, StorageCommand,
    StorageCommandResult, StorageEntry, Write,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

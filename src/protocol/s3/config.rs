//! Storage location configuration
//!
//! A [`StorageConfig`] identifies one S3 location: endpoint, region, bucket,
//! credentials and an optional root path prefixed to every entry key. It also
//! carries the retry policy the SDK client applies to each request. Two
//! configs that compare equal share one cached adapter, so every field takes
//! part in equality and hashing.

use super::error::{S3Error, S3Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Default SDK retries per request
pub const DEFAULT_SDK_MAX_RETRIES: u32 = 3;

/// Default base delay of the SDK retry backoff, in seconds
pub const DEFAULT_SDK_BACKOFF_BASE_SECS: u64 = 1;

/// Default ceiling of the SDK retry backoff, in seconds
pub const DEFAULT_SDK_BACKOFF_MAX_SECS: u64 = 20;

fn default_max_retries() -> u32 {
    DEFAULT_SDK_MAX_RETRIES
}

fn default_backoff_base() -> u64 {
    DEFAULT_SDK_BACKOFF_BASE_SECS
}

fn default_backoff_max() -> u64 {
    DEFAULT_SDK_BACKOFF_MAX_SECS
}

/// Connection settings for one S3 location
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Custom endpoint URL (MinIO, LocalStack, Ceph...); `None` targets AWS
    #[serde(default)]
    endpoint: Option<String>,

    /// AWS region
    region: String,

    /// Bucket name
    bucket: String,

    /// Access key id
    access_key: String,

    /// Secret access key
    secret_key: String,

    /// Key prefix under which entries are stored
    #[serde(default)]
    root_path: Option<String>,

    /// Use path-style addressing (required by most S3-compatible servers)
    #[serde(default)]
    force_path_style: bool,

    /// Retries the SDK makes for one request before reporting a failure
    #[serde(default = "default_max_retries")]
    max_retries: u32,

    /// Base delay of the SDK retry backoff
    #[serde(default = "default_backoff_base")]
    retry_backoff_base_secs: u64,

    /// Ceiling of the SDK retry backoff
    #[serde(default = "default_backoff_max")]
    retry_backoff_max_secs: u64,
}

impl StorageConfig {
    /// Start building a config for `bucket`
    pub fn builder(bucket: impl Into<String>) -> StorageConfigBuilder {
        StorageConfigBuilder::new(bucket)
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn access_key(&self) -> &str {
        &self.access_key
    }

    pub fn secret_key(&self) -> &str {
        &self.secret_key
    }

    pub fn root_path(&self) -> Option<&str> {
        self.root_path.as_deref()
    }

    pub fn force_path_style(&self) -> bool {
        self.force_path_style
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn retry_backoff_base(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_base_secs)
    }

    pub fn retry_backoff_max(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_max_secs)
    }

    /// Full object key for an entry name, joined under the root path
    ///
    /// ```
    /// use orbit_storage::protocol::s3::StorageConfig;
    ///
    /// let config = StorageConfig::builder("artifacts")
    ///     .region("us-east-1")
    ///     .credentials("key", "secret")
    ///     .root_path("tenant-a/")
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(config.entry_key("/blob.bin"), "tenant-a/blob.bin");
    /// ```
    pub fn entry_key(&self, name: &str) -> String {
        let name = name.trim_start_matches('/');
        match self
            .root_path
            .as_deref()
            .map(|root| root.trim_matches('/'))
            .filter(|root| !root.is_empty())
        {
            Some(root) => format!("{}/{}", root, name),
            None => name.to_string(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> S3Result<()> {
        if self.bucket.is_empty() {
            return Err(S3Error::InvalidBucketName(
                "Bucket name cannot be empty".to_string(),
            ));
        }

        if !is_valid_bucket_name(&self.bucket) {
            return Err(S3Error::InvalidBucketName(format!(
                "Invalid bucket name: {}. Bucket names must be 3-63 characters, \
                 lowercase letters, numbers, hyphens, and periods only",
                self.bucket
            )));
        }

        if self.region.trim().is_empty() {
            return Err(S3Error::InvalidConfig("Region cannot be empty".to_string()));
        }

        if self.access_key.is_empty() || self.secret_key.is_empty() {
            return Err(S3Error::InvalidConfig(
                "Access key and secret key must both be set".to_string(),
            ));
        }

        if self.retry_backoff_base_secs > self.retry_backoff_max_secs {
            return Err(S3Error::InvalidConfig(format!(
                "retry_backoff_base_secs ({}) exceeds retry_backoff_max_secs ({})",
                self.retry_backoff_base_secs, self.retry_backoff_max_secs
            )));
        }

        if let Some(endpoint) = &self.endpoint {
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                return Err(S3Error::InvalidConfig(format!(
                    "Endpoint must be an http(s) URL: {}",
                    endpoint
                )));
            }
        }

        Ok(())
    }
}

impl fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageConfig")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("root_path", &self.root_path)
            .field("force_path_style", &self.force_path_style)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_base_secs", &self.retry_backoff_base_secs)
            .field("retry_backoff_max_secs", &self.retry_backoff_max_secs)
            .finish()
    }
}

/// Builder for [`StorageConfig`]
#[derive(Debug, Clone)]
pub struct StorageConfigBuilder {
    config: StorageConfig,
}

impl StorageConfigBuilder {
    /// Create a new builder with bucket name
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            config: StorageConfig {
                endpoint: None,
                region: "us-east-1".to_string(),
                bucket: bucket.into(),
                access_key: String::new(),
                secret_key: String::new(),
                root_path: None,
                force_path_style: false,
                max_retries: DEFAULT_SDK_MAX_RETRIES,
                retry_backoff_base_secs: DEFAULT_SDK_BACKOFF_BASE_SECS,
                retry_backoff_max_secs: DEFAULT_SDK_BACKOFF_MAX_SECS,
            },
        }
    }

    /// Set the AWS region
    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.config.region = region.into();
        self
    }

    /// Set custom endpoint (for MinIO, LocalStack, etc.)
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.endpoint = Some(endpoint.into());
        self
    }

    /// Set credentials
    pub fn credentials(mut self, access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        self.config.access_key = access_key.into();
        self.config.secret_key = secret_key.into();
        self
    }

    /// Set the key prefix for entries
    pub fn root_path(mut self, root_path: impl Into<String>) -> Self {
        self.config.root_path = Some(root_path.into());
        self
    }

    /// Enable path-style addressing
    pub fn force_path_style(mut self, force: bool) -> Self {
        self.config.force_path_style = force;
        self
    }

    /// Set how many times the SDK retries one request
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.config.max_retries = max_retries;
        self
    }

    /// Set the SDK retry backoff base delay and ceiling, in seconds
    pub fn retry_backoff_secs(mut self, base: u64, max: u64) -> Self {
        self.config.retry_backoff_base_secs = base;
        self.config.retry_backoff_max_secs = max;
        self
    }

    /// Validate and build the config
    pub fn build(self) -> S3Result<StorageConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Validate S3 bucket name according to AWS rules
fn is_valid_bucket_name(name: &str) -> bool {
    if !(3..=63).contains(&name.len()) {
        return false;
    }

    let edge_ok = |c: Option<char>| c.is_some_and(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
    if !edge_ok(name.chars().next()) || !edge_ok(name.chars().last()) {
        return false;
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
    {
        return false;
    }

    if name.contains("..") {
        return false;
    }

    // Cannot be formatted as IP address
    if name.split('.').count() == 4 && name.split('.').all(|s| s.parse::<u8>().is_ok()) {
        return false;
    }

    // Reserved prefix and suffix
    !name.starts_with("xn--") && !name.ends_with("-s3alias")
}

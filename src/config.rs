/*!
 * Configuration types for orbit-storage
 */

use orbit_core_resilience::ClientHealthConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{OrbitError, Result};
use crate::protocol::s3::{
    BackoffStrategy, RetryPolicy, DEFAULT_PART_SIZE, DEFAULT_PREFETCH, MAX_PREFETCH,
    MIN_PART_SIZE,
};

/// Settings for a [`StorageClient`](crate::storage::StorageClient)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageClientSettings {
    /// Part size for multipart uploads; smaller known-size entries use one PUT
    #[serde(default = "default_max_bytes_per_part")]
    pub max_bytes_per_part: usize,

    /// Accept parts below the S3 minimum (for S3-compatible stores and tests)
    #[serde(default)]
    pub allow_small_parts: bool,

    /// Chunks buffered ahead and part uploads in flight
    #[serde(default = "default_reactor_prefetch")]
    pub reactor_prefetch: usize,

    /// Consecutive transport failures tolerated before the SDK client is rebuilt
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,

    /// Idle time before a cached client is evicted
    #[serde(default = "default_client_idle_timeout")]
    pub client_idle_timeout_secs: u64,

    /// Timeout of a single S3 operation
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_secs: u64,

    #[serde(default = "RetrySettings::read")]
    pub read_retry: RetrySettings,

    #[serde(default = "RetrySettings::delete")]
    pub delete_retry: RetrySettings,

    #[serde(default)]
    pub log: LogSettings,
}

impl Default for StorageClientSettings {
    fn default() -> Self {
        Self {
            max_bytes_per_part: default_max_bytes_per_part(),
            allow_small_parts: false,
            reactor_prefetch: default_reactor_prefetch(),
            max_consecutive_failures: default_max_consecutive_failures(),
            client_idle_timeout_secs: default_client_idle_timeout(),
            operation_timeout_secs: default_operation_timeout(),
            read_retry: RetrySettings::read(),
            delete_retry: RetrySettings::delete(),
            log: LogSettings::default(),
        }
    }
}

/// Retry schedule with capped exponential backoff
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Retries after the first attempt
    pub max_retries: u32,

    /// Delay before the first retry
    pub initial_delay_ms: u64,

    /// Upper bound for any delay
    pub max_delay_ms: u64,

    /// Random spread applied to each delay (0.0 disables jitter)
    #[serde(default)]
    pub jitter_factor: f64,
}

impl RetrySettings {
    /// Reads: 3 retries from 2s, capped at 3s
    pub fn read() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 2_000,
            max_delay_ms: 3_000,
            jitter_factor: 0.0,
        }
    }

    /// Deletes: 5 retries from 5s with 0.2 jitter, capped at 5 minutes
    pub fn delete() -> Self {
        Self {
            max_retries: 5,
            initial_delay_ms: 5_000,
            max_delay_ms: 300_000,
            jitter_factor: 0.2,
        }
    }

    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries.saturating_add(1),
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            backoff: if self.jitter_factor > 0.0 {
                BackoffStrategy::ExponentialWithJitter
            } else {
                BackoffStrategy::Exponential
            },
            jitter_factor: self.jitter_factor,
        }
    }

    fn validate(&self, name: &str) -> Result<()> {
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(OrbitError::Config(format!(
                "{}: jitter_factor must be within 0.0..=1.0, got {}",
                name, self.jitter_factor
            )));
        }
        if self.initial_delay_ms > self.max_delay_ms {
            return Err(OrbitError::Config(format!(
                "{}: initial_delay_ms ({}) exceeds max_delay_ms ({})",
                name, self.initial_delay_ms, self.max_delay_ms
            )));
        }
        Ok(())
    }
}

/// Logging output settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct LogSettings {
    #[serde(default)]
    pub level: LogLevel,

    /// Write JSON logs to this file instead of stdout
    #[serde(default)]
    pub file: Option<PathBuf>,

    /// Shortcut for debug level
    #[serde(default)]
    pub verbose: bool,
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

// Default value functions for serde
fn default_max_bytes_per_part() -> usize {
    DEFAULT_PART_SIZE
}

fn default_reactor_prefetch() -> usize {
    DEFAULT_PREFETCH
}

fn default_max_consecutive_failures() -> u32 {
    3
}

fn default_client_idle_timeout() -> u64 {
    30 * 60
}

fn default_operation_timeout() -> u64 {
    300
}

impl StorageClientSettings {
    /// Load and validate settings from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let settings: StorageClientSettings = toml::from_str(&contents)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Save settings to a TOML file
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| OrbitError::Config(format!("Failed to serialize settings: {}", e)))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if self.max_bytes_per_part == 0 {
            return Err(OrbitError::Config(
                "max_bytes_per_part must be greater than zero".to_string(),
            ));
        }
        if self.max_bytes_per_part < MIN_PART_SIZE && !self.allow_small_parts {
            return Err(OrbitError::Config(format!(
                "max_bytes_per_part ({}) is below the S3 minimum of {} bytes; \
                 set allow_small_parts for S3-compatible stores",
                self.max_bytes_per_part, MIN_PART_SIZE
            )));
        }
        if !(1..=MAX_PREFETCH).contains(&self.reactor_prefetch) {
            return Err(OrbitError::Config(format!(
                "reactor_prefetch must be within 1..={}, got {}",
                MAX_PREFETCH, self.reactor_prefetch
            )));
        }
        if self.client_idle_timeout_secs == 0 {
            return Err(OrbitError::Config(
                "client_idle_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.operation_timeout_secs == 0 {
            return Err(OrbitError::Config(
                "operation_timeout_secs must be greater than zero".to_string(),
            ));
        }
        self.read_retry.validate("read_retry")?;
        self.delete_retry.validate("delete_retry")?;
        Ok(())
    }

    pub fn client_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.client_idle_timeout_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    pub fn health_config(&self) -> ClientHealthConfig {
        ClientHealthConfig {
            max_consecutive_failures: self.max_consecutive_failures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let settings = StorageClientSettings::default();
        assert_eq!(settings.max_bytes_per_part, 5 * 1024 * 1024);
        assert_eq!(settings.reactor_prefetch, 4);
        assert_eq!(settings.max_consecutive_failures, 3);
        assert_eq!(settings.client_idle_timeout(), Duration::from_secs(1800));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_retry_policies() {
        let read = RetrySettings::read().to_policy();
        assert_eq!(read.max_attempts, 4);
        assert_eq!(read.backoff, BackoffStrategy::Exponential);
        assert_eq!(read.max_delay, Duration::from_secs(3));

        let delete = RetrySettings::delete().to_policy();
        assert_eq!(delete.max_attempts, 6);
        assert_eq!(delete.backoff, BackoffStrategy::ExponentialWithJitter);
        assert_eq!(delete.initial_delay, Duration::from_secs(5));
        assert_eq!(delete.max_delay, Duration::from_secs(300));
    }

    #[test]
    fn test_small_parts_need_opt_in() {
        let mut settings = StorageClientSettings {
            max_bytes_per_part: 5_000_000,
            ..Default::default()
        };
        assert!(matches!(settings.validate(), Err(OrbitError::Config(_))));

        settings.allow_small_parts = true;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_prefetch_bounds() {
        for prefetch in [0, MAX_PREFETCH + 1] {
            let settings = StorageClientSettings {
                reactor_prefetch: prefetch,
                ..Default::default()
            };
            assert!(settings.validate().is_err());
        }
    }

    #[test]
    fn test_invalid_jitter() {
        let settings = StorageClientSettings {
            delete_retry: RetrySettings {
                jitter_factor: 1.5,
                ..RetrySettings::delete()
            },
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let toml_str = r#"
reactor_prefetch = 2
max_consecutive_failures = 5

[delete_retry]
max_retries = 2
initial_delay_ms = 100
max_delay_ms = 1000

[log]
level = "debug"
"#;

        let settings: StorageClientSettings = toml::from_str(toml_str).unwrap();
        assert_eq!(settings.reactor_prefetch, 2);
        assert_eq!(settings.max_consecutive_failures, 5);
        assert_eq!(settings.max_bytes_per_part, DEFAULT_PART_SIZE);
        assert_eq!(settings.read_retry, RetrySettings::read());
        assert_eq!(settings.delete_retry.max_retries, 2);
        assert_eq!(settings.delete_retry.jitter_factor, 0.0);
        assert_eq!(settings.log.level, LogLevel::Debug);
    }

    #[test]
    fn test_file_round_trip() {
        let file = NamedTempFile::new().unwrap();
        let settings = StorageClientSettings {
            reactor_prefetch: 8,
            operation_timeout_secs: 60,
            ..Default::default()
        };

        settings.to_file(file.path()).unwrap();
        let loaded = StorageClientSettings::from_file(file.path()).unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_from_file_rejects_invalid() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "reactor_prefetch = 0\n").unwrap();

        assert!(matches!(
            StorageClientSettings::from_file(file.path()),
            Err(OrbitError::Config(_))
        ));
    }

    #[test]
    fn test_log_level_conversion() {
        assert_eq!(LogLevel::Error.to_tracing_level(), tracing::Level::ERROR);
        assert_eq!(LogLevel::Trace.to_tracing_level(), tracing::Level::TRACE);
    }
}

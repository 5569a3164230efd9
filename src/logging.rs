/*!
 * Logging and tracing initialization
 */

use std::fs::File;
use std::path::Path;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::LogSettings;
use crate::error::{OrbitError, Result};

/// Initialize structured logging based on configuration
pub fn init_logging(settings: &LogSettings) -> Result<()> {
    let env_filter = build_filter(settings)?;

    // Create the subscriber based on log file configuration
    if let Some(ref log_path) = settings.file {
        init_file_logging(log_path, env_filter)
    } else {
        init_stdout_logging(env_filter)
    }
}

fn effective_level(settings: &LogSettings) -> Level {
    if settings.verbose {
        Level::DEBUG
    } else {
        settings.level.to_tracing_level()
    }
}

/// `RUST_LOG` wins; otherwise `orbit_storage=<level>`
fn build_filter(settings: &LogSettings) -> Result<EnvFilter> {
    let log_level = effective_level(settings);
    EnvFilter::try_from_default_env()
        .or_else(|_| {
            EnvFilter::try_new(format!(
                "orbit_storage={lvl},orbit_core_resilience={lvl}",
                lvl = log_level
            ))
        })
        .map_err(|e| OrbitError::Config(format!("Failed to create log filter: {}", e)))
}

/// Initialize logging to stdout/stderr
fn init_stdout_logging(env_filter: EnvFilter) -> Result<()> {
    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .with_span_events(FmtSpan::NONE)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| OrbitError::Logging(e.to_string()))
}

/// Initialize logging to a file
fn init_file_logging(log_path: &Path, env_filter: EnvFilter) -> Result<()> {
    let file = File::create(log_path)
        .map_err(|e| OrbitError::Config(format!("Failed to create log file: {}", e)))?;

    let fmt_layer = fmt::layer()
        .with_writer(file)
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(false) // No ANSI colors in file
        .json();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| OrbitError::Logging(e.to_string()))
}

/// Route logs to the test harness writer; safe to call from every test
pub fn init_test_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("orbit_storage=debug"));

        let fmt_layer = fmt::layer().with_test_writer().with_target(false).compact();

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .ok(); // Ignore error if already initialized
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;
    use tempfile::NamedTempFile;

    #[test]
    fn test_verbose_overrides_log_level() {
        let settings = LogSettings {
            level: LogLevel::Error,
            file: None,
            verbose: true,
        };
        assert_eq!(effective_level(&settings), Level::DEBUG);
    }

    #[test]
    fn test_level_from_settings() {
        let settings = LogSettings {
            level: LogLevel::Warn,
            ..Default::default()
        };
        assert_eq!(effective_level(&settings), Level::WARN);
        assert!(build_filter(&settings).is_ok());
    }

    #[test]
    fn test_file_logging_creates_file() {
        let temp_file = NamedTempFile::new().unwrap();
        let log_path = temp_file.path().to_path_buf();
        std::fs::remove_file(&log_path).unwrap();

        let settings = LogSettings {
            level: LogLevel::Debug,
            file: Some(log_path.clone()),
            verbose: false,
        };

        // A global subscriber may already be installed by another test
        let _ = init_logging(&settings);
        assert!(log_path.exists());
    }

    #[test]
    fn test_init_test_logging_twice() {
        init_test_logging();
        init_test_logging();
    }
}

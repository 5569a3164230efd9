/*!
 * Error types for orbit-storage
 */

use std::fmt;
use std::io;

use crate::protocol::s3::S3Error;

pub type Result<T> = std::result::Result<T, OrbitError>;

#[derive(Debug)]
pub enum OrbitError {
    /// Configuration error
    Config(String),

    /// I/O error
    Io(io::Error),

    /// Logging setup failed
    Logging(String),

    /// Error from the S3 layer
    Storage(S3Error),
}

impl OrbitError {
    /// Check if this error is fatal (should not retry)
    pub fn is_fatal(&self) -> bool {
        match self {
            OrbitError::Config(_) | OrbitError::Logging(_) => true,
            OrbitError::Io(_) => false,
            OrbitError::Storage(e) => !e.is_transport(),
        }
    }
}

impl fmt::Display for OrbitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrbitError::Config(msg) => {
                write!(f, "Configuration error: {}", msg)
            }
            OrbitError::Io(err) => {
                write!(f, "I/O error: {}", err)
            }
            OrbitError::Logging(msg) => {
                write!(f, "Logging error: {}", msg)
            }
            OrbitError::Storage(err) => {
                write!(f, "Storage error: {}", err)
            }
        }
    }
}

impl std::error::Error for OrbitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            OrbitError::Io(err) => Some(err),
            OrbitError::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for OrbitError {
    fn from(err: io::Error) -> Self {
        OrbitError::Io(err)
    }
}

impl From<toml::de::Error> for OrbitError {
    fn from(err: toml::de::Error) -> Self {
        OrbitError::Config(format!("TOML parse error: {}", err))
    }
}

impl From<S3Error> for OrbitError {
    fn from(err: S3Error) -> Self {
        OrbitError::Storage(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_errors() {
        assert!(OrbitError::Config("test".to_string()).is_fatal());
        assert!(OrbitError::Storage(S3Error::AccessDenied("no".to_string())).is_fatal());
        assert!(!OrbitError::Storage(S3Error::Network("reset".to_string())).is_fatal());
        assert!(!OrbitError::Io(io::Error::other("test")).is_fatal());
    }

    #[test]
    fn test_error_display() {
        let err = OrbitError::Config("reactor_prefetch out of range".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: reactor_prefetch out of range"
        );
    }

    #[test]
    fn test_toml_error_is_config() {
        let err: OrbitError = toml::from_str::<toml::Value>("= broken").unwrap_err().into();
        assert!(matches!(err, OrbitError::Config(_)));
    }

    #[test]
    fn test_source_chain() {
        use std::error::Error;

        let err = OrbitError::from(S3Error::Timeout("slow".to_string()));
        assert!(err.source().is_some());
    }
}

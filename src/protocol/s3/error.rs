//! Error types for S3 operations

use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use orbit_core_resilience::{FailureClass, ResilienceError};
use std::io;
use thiserror::Error;

/// Result type alias for S3 operations
pub type S3Result<T> = Result<T, S3Error>;

/// Errors that can occur during S3 operations
#[derive(Error, Debug, Clone)]
pub enum S3Error {
    /// AWS SDK error
    #[error("AWS SDK error: {0}")]
    Sdk(String),

    /// S3 service error with specific error code
    #[error("S3 service error ({code}): {message}")]
    Service { code: String, message: String },

    /// Object not found in bucket
    #[error("Object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    /// Bucket not found or not accessible
    #[error("Bucket not found or not accessible: {0}")]
    BucketNotFound(String),

    /// Access denied error
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid bucket name
    #[error("Invalid bucket name: {0}")]
    InvalidBucketName(String),

    /// Invalid object key
    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    /// Multipart upload error (rejected completion, missing e-tag, ...)
    #[error("Multipart upload error: {0}")]
    MultipartUpload(String),

    /// Checksum mismatch
    #[error("Checksum mismatch for {key}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        key: String,
        expected: String,
        actual: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(String),

    /// Network error
    #[error("Network error: {0}")]
    Network(String),

    /// Timeout error
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Rate limit exceeded
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// Authentication error
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// The worker task running the operation panicked or was cancelled
    #[error("Storage task failed: {0}")]
    TaskFailed(String),

    /// No SDK client could be obtained
    #[error("S3 client unavailable: {0}")]
    ClientUnavailable(String),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        source: Box<S3Error>,
    },
}

impl S3Error {
    /// Add context to an error
    pub fn context<S: Into<String>>(self, context: S) -> Self {
        S3Error::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Innermost error, looking through context wrappers
    pub fn root(&self) -> &S3Error {
        match self {
            S3Error::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    /// Check if error reports a missing object
    pub fn is_not_found(&self) -> bool {
        match self.root() {
            S3Error::NotFound { .. } => true,
            S3Error::Service { code, .. } => is_not_found_code(code),
            _ => false,
        }
    }

    /// Check if error comes from the transport or protocol layer.
    ///
    /// These are the failures that may indicate a broken client and are
    /// worth retrying. Domain outcomes (missing object, checksum mismatch)
    /// and configuration or permission problems return `false`.
    pub fn is_transport(&self) -> bool {
        match self.root() {
            S3Error::Service { code, .. } => !is_not_found_code(code),
            S3Error::Sdk(_)
            | S3Error::Network(_)
            | S3Error::Timeout(_)
            | S3Error::RateLimitExceeded(_)
            | S3Error::Io(_)
            | S3Error::MultipartUpload(_)
            | S3Error::TaskFailed(_) => true,
            S3Error::NotFound { .. }
            | S3Error::ChecksumMismatch { .. }
            | S3Error::BucketNotFound(_)
            | S3Error::AccessDenied(_)
            | S3Error::InvalidConfig(_)
            | S3Error::InvalidBucketName(_)
            | S3Error::InvalidKey(_)
            | S3Error::Authentication(_)
            | S3Error::ClientUnavailable(_) => false,
            S3Error::WithContext { .. } => false,
        }
    }
}

impl FailureClass for S3Error {
    fn is_instability(&self) -> bool {
        self.is_transport()
    }
}

impl From<ResilienceError> for S3Error {
    fn from(err: ResilienceError) -> Self {
        S3Error::ClientUnavailable(err.to_string())
    }
}

// Convert io::Error to S3Error
impl From<io::Error> for S3Error {
    fn from(err: io::Error) -> Self {
        S3Error::Io(err.to_string())
    }
}

fn is_not_found_code(code: &str) -> bool {
    matches!(code, "NoSuchKey" | "NotFound" | "NoSuchUpload")
}

/// Map an S3 error code (plus HTTP status) onto the closest variant
pub(crate) fn from_service_code(code: &str, message: &str, status: u16) -> S3Error {
    match code {
        "NoSuchBucket" => S3Error::BucketNotFound(message.to_string()),
        "AccessDenied" | "AllAccessDisabled" => S3Error::AccessDenied(message.to_string()),
        "InvalidAccessKeyId" | "SignatureDoesNotMatch" | "ExpiredToken" => {
            S3Error::Authentication(message.to_string())
        }
        "SlowDown" | "TooManyRequests" => S3Error::RateLimitExceeded(message.to_string()),
        "RequestTimeout" => S3Error::Timeout(message.to_string()),
        _ if code.is_empty() && status == 404 => S3Error::Service {
            code: "NotFound".to_string(),
            message: message.to_string(),
        },
        _ if code.is_empty() && status == 403 => S3Error::AccessDenied(message.to_string()),
        _ => S3Error::Service {
            code: if code.is_empty() {
                format!("Http{}", status)
            } else {
                code.to_string()
            },
            message: message.to_string(),
        },
    }
}

/// Convert AWS SDK errors to S3Error
impl<E> From<SdkError<E>> for S3Error
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    fn from(error: SdkError<E>) -> Self {
        match &error {
            SdkError::DispatchFailure(failure) if failure.is_timeout() => {
                S3Error::Timeout(format!("{}", DisplayErrorContext(&error)))
            }
            SdkError::DispatchFailure(_) => {
                S3Error::Network(format!("Network dispatch failure: {}", DisplayErrorContext(&error)))
            }
            SdkError::TimeoutError(_) => {
                S3Error::Timeout(format!("{}", DisplayErrorContext(&error)))
            }
            SdkError::ResponseError(_) => {
                S3Error::Network(format!("Response error: {}", DisplayErrorContext(&error)))
            }
            SdkError::ServiceError(ctx) => {
                let err = ctx.err();
                from_service_code(
                    err.code().unwrap_or_default(),
                    err.message().unwrap_or("no message"),
                    ctx.raw().status().as_u16(),
                )
            }
            _ => S3Error::Sdk(format!("{}", DisplayErrorContext(&error))),
        }
    }
}

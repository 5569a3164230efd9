//! Error types for the resilience primitives

use thiserror::Error;

/// Errors raised by the resilience primitives themselves.
///
/// Errors produced by the guarded operation are never wrapped in this type;
/// they are handed back to the caller unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResilienceError {
    /// The client factory failed to build a client
    #[error("Client creation failed: {0}")]
    ClientCreation(String),

    /// The manager was closed and no longer hands out clients
    #[error("Client manager is closed")]
    Closed,
}

impl ResilienceError {
    /// Whether retrying the same call later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, ResilienceError::ClientCreation(_))
    }
}

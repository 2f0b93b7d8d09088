//! Resilience error taxonomy.

use std::time::Duration;

use thiserror::Error;

/// Breaker rejected a call while OPEN (or with HALF_OPEN trial slots full).
pub const CIRCUIT_BREAKER_OPEN: &str = "CIRCUIT_BREAKER_OPEN";
/// Primary did not settle within the fallback timeout.
pub const OPERATION_TIMEOUT: &str = "OPERATION_TIMEOUT";
/// The wrapped operation failed on its own.
pub const OPERATION_FAILED: &str = "OPERATION_FAILED";
/// The fallback path failed; there is no further tier.
pub const FALLBACK_FAILED: &str = "FALLBACK_FAILED";

const UNAVAILABLE_MESSAGE: &str = "Service temporarily unavailable, please retry shortly";

/// Error returned by [`CircuitBreaker::execute`](super::CircuitBreaker::execute).
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    #[error("circuit breaker '{name}' is open, retry after {retry_after:?}")]
    Open { name: String, retry_after: Duration },

    /// The wrapped operation's own error, unchanged.
    #[error("{0}")]
    Operation(E),
}

impl<E> BreakerError<E> {
    pub fn code(&self) -> &'static str {
        match self {
            BreakerError::Open { .. } => CIRCUIT_BREAKER_OPEN,
            BreakerError::Operation(_) => OPERATION_FAILED,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::Open { .. })
    }

    pub fn into_operation(self) -> Option<E> {
        match self {
            BreakerError::Operation(e) => Some(e),
            BreakerError::Open { .. } => None,
        }
    }
}

impl<E: std::fmt::Display> BreakerError<E> {
    /// Text suitable for an end user.
    pub fn user_message(&self) -> String {
        match self {
            BreakerError::Open { .. } => UNAVAILABLE_MESSAGE.to_string(),
            BreakerError::Operation(e) => e.to_string(),
        }
    }
}

/// Error attached to a failed [`FallbackResult`](super::fallback::FallbackResult).
#[derive(Debug, Error)]
pub enum FallbackError<E> {
    #[error("{message} (after {after:?})")]
    Timeout { after: Duration, message: String },

    #[error("primary operation failed: {0}")]
    Primary(E),

    #[error("fallback failed: {0}")]
    Fallback(E),

    #[error("circuit breaker '{name}' is open, retry after {retry_after:?}")]
    CircuitOpen { name: String, retry_after: Duration },
}

impl<E> FallbackError<E> {
    pub fn code(&self) -> &'static str {
        match self {
            FallbackError::Timeout { .. } => OPERATION_TIMEOUT,
            FallbackError::Primary(_) => OPERATION_FAILED,
            FallbackError::Fallback(_) => FALLBACK_FAILED,
            FallbackError::CircuitOpen { .. } => CIRCUIT_BREAKER_OPEN,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, FallbackError::Timeout { .. })
    }
}

/// Cache fallback found neither a cached value nor a default.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no cached value for '{key}'")]
pub struct CacheMissError {
    pub key: String,
}

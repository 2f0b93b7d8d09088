//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to a downstream dependency:
//!     → circuit_breaker.rs (admit or fast-fail, track outcome, transition)
//!     → On CIRCUIT_BREAKER_OPEN: fallback.rs (registered fallback for that dependency)
//!     → Or: fallback.rs (race primary against a deadline, fallback on timeout)
//!     → fallbacks.rs (cache / default / empty / retrying fallbacks)
//! ```
//!
//! # Design Decisions
//! - One breaker per dependency, never shared
//! - Operation errors pass through unchanged; only the breaker's own
//!   rejection and the fallback deadline are synthesized errors
//! - Retrying is a fallback, not a layer around the breaker

pub mod backoff;
pub mod circuit_breaker;
pub mod error;
pub mod fallback;
pub mod fallbacks;

pub use circuit_breaker::{
    BreakerMetrics, CircuitBreaker, CircuitBreakerConfig, CircuitState, HealthStatus, StateChangeListener,
};
pub use error::{BreakerError, CacheMissError, FallbackError};
pub use fallback::{
    execute_with_fallback, CircuitBreakerWithFallback, FallbackData, FallbackExecutor, FallbackOptions,
    FallbackResult, ResultSource,
};

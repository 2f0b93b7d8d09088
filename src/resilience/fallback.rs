//! Time-boxed fallback execution.
//!
//! # Responsibilities
//! - Race a primary operation against a deadline
//! - Substitute a fallback outcome when the primary is too slow
//! - Substitute a fallback outcome when the guarding circuit is open
//!
//! # Design Decisions
//! - Only a timeout triggers the fallback; a primary that fails on its own
//!   is surfaced as-is
//! - The losing primary future is dropped, never awaited. Aborting the
//!   underlying request (if it was spawned elsewhere) is the caller's job
//! - No secondary fallback tier: a failing fallback is a hard failure

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::Instrument;

use crate::observability::metrics;
use crate::resilience::circuit_breaker::CircuitBreaker;
use crate::resilience::error::{BreakerError, FallbackError};

/// Which path produced a [`FallbackResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultSource {
    Primary,
    Fallback,
}

impl ResultSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultSource::Primary => "primary",
            ResultSource::Fallback => "fallback",
        }
    }
}

/// Value produced by either path.
#[derive(Debug, Clone, PartialEq)]
pub enum FallbackData<T, F> {
    Primary(T),
    Fallback(F),
}

impl<T> FallbackData<T, T> {
    pub fn into_inner(self) -> T {
        match self {
            FallbackData::Primary(v) | FallbackData::Fallback(v) => v,
        }
    }
}

/// Outcome of one fallback-guarded invocation.
///
/// When the fallback path succeeds, [`error`](Self::error) reports why it
/// was taken (timeout or open circuit).
#[derive(Debug)]
pub struct FallbackResult<T, F, E> {
    outcome: Result<FallbackData<T, F>, FallbackError<E>>,
    reason: Option<FallbackError<E>>,
    source: ResultSource,
    duration: Duration,
}

impl<T, F, E> FallbackResult<T, F, E> {
    fn settled(
        source: ResultSource,
        outcome: Result<FallbackData<T, F>, FallbackError<E>>,
        reason: Option<FallbackError<E>>,
        started: Instant,
    ) -> Self {
        metrics::record_fallback(source);
        Self {
            outcome,
            reason,
            source,
            duration: started.elapsed(),
        }
    }

    pub fn success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn data(&self) -> Option<&FallbackData<T, F>> {
        self.outcome.as_ref().ok()
    }

    /// The failure, or on a successful fallback the reason it ran.
    pub fn error(&self) -> Option<&FallbackError<E>> {
        match &self.outcome {
            Err(error) => Some(error),
            Ok(_) => self.reason.as_ref(),
        }
    }

    pub fn source(&self) -> ResultSource {
        self.source
    }

    /// From call start until the winning path settled.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn is_fallback(&self) -> bool {
        self.source == ResultSource::Fallback
    }

    pub fn into_result(self) -> Result<FallbackData<T, F>, FallbackError<E>> {
        self.outcome
    }
}

impl<T, E> FallbackResult<T, T, E> {
    /// Collapse same-typed results into the produced value.
    pub fn into_value(self) -> Result<T, FallbackError<E>> {
        self.into_result().map(FallbackData::into_inner)
    }
}

/// Per-call options.
#[derive(Debug, Clone)]
pub struct FallbackOptions {
    pub timeout: Duration,
    /// Message of the synthesized timeout error.
    pub timeout_error: Option<String>,
    /// Log a warning whenever the fallback path is taken.
    pub log_fallback: bool,
}

impl FallbackOptions {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            timeout_error: None,
            log_fallback: true,
        }
    }

    pub fn with_timeout_error(mut self, message: impl Into<String>) -> Self {
        self.timeout_error = Some(message.into());
        self
    }

    pub fn with_log_fallback(mut self, enabled: bool) -> Self {
        self.log_fallback = enabled;
        self
    }

    fn timeout_message(&self) -> String {
        self.timeout_error
            .clone()
            .unwrap_or_else(|| format!("operation timed out after {}ms", self.timeout.as_millis()))
    }
}

/// Race `primary` against `options.timeout`; run `fallback` if the deadline wins.
pub async fn execute_with_fallback<P, PFut, T, B, BFut, F, E>(
    primary: P,
    fallback: B,
    options: &FallbackOptions,
) -> FallbackResult<T, F, E>
where
    P: FnOnce() -> PFut,
    PFut: Future<Output = Result<T, E>>,
    B: FnOnce() -> BFut,
    BFut: Future<Output = Result<F, E>>,
{
    let started = Instant::now();

    match tokio::time::timeout(options.timeout, primary()).await {
        Ok(Ok(value)) => FallbackResult::settled(
            ResultSource::Primary,
            Ok(FallbackData::Primary(value)),
            None,
            started,
        ),
        Ok(Err(e)) => {
            tracing::debug!("Primary failed before timeout, not falling back");
            FallbackResult::settled(ResultSource::Primary, Err(FallbackError::Primary(e)), None, started)
        }
        Err(_) => {
            let message = options.timeout_message();
            if options.log_fallback {
                tracing::warn!(
                    timeout_ms = options.timeout.as_millis() as u64,
                    reason = %message,
                    "Primary timed out, using fallback"
                );
            }
            let reason = FallbackError::Timeout {
                after: options.timeout,
                message,
            };
            let outcome = fallback()
                .await
                .map(FallbackData::Fallback)
                .map_err(FallbackError::Fallback);
            FallbackResult::settled(ResultSource::Fallback, outcome, Some(reason), started)
        }
    }
}

/// Named executor with fixed options.
#[derive(Debug, Clone)]
pub struct FallbackExecutor {
    name: String,
    options: FallbackOptions,
}

impl FallbackExecutor {
    pub fn new(name: impl Into<String>, options: FallbackOptions) -> Self {
        Self {
            name: name.into(),
            options,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &FallbackOptions {
        &self.options
    }

    pub async fn execute<P, PFut, T, B, BFut, F, E>(&self, primary: P, fallback: B) -> FallbackResult<T, F, E>
    where
        P: FnOnce() -> PFut,
        PFut: Future<Output = Result<T, E>>,
        B: FnOnce() -> BFut,
        BFut: Future<Output = Result<F, E>>,
    {
        let result = execute_with_fallback(primary, fallback, &self.options)
            .instrument(tracing::debug_span!("fallback", executor = %self.name))
            .await;
        if result.is_fallback() {
            tracing::debug!(executor = %self.name, success = result.success(), "Fallback path taken");
        }
        result
    }
}

/// Stored fallback producing the same type as the guarded operation.
pub type FallbackFn<T, E> = Arc<dyn Fn() -> BoxFuture<'static, Result<T, E>> + Send + Sync>;

/// A breaker and the fallback for the same downstream dependency.
///
/// The fallback runs only when the breaker rejects with
/// `CIRCUIT_BREAKER_OPEN`; operation errors are surfaced unchanged.
pub struct CircuitBreakerWithFallback<T, E> {
    breaker: Arc<CircuitBreaker>,
    fallback: FallbackFn<T, E>,
    log_fallback: bool,
}

impl<T, E> Clone for CircuitBreakerWithFallback<T, E> {
    fn clone(&self) -> Self {
        Self {
            breaker: self.breaker.clone(),
            fallback: self.fallback.clone(),
            log_fallback: self.log_fallback,
        }
    }
}

impl<T, E> CircuitBreakerWithFallback<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    pub fn new<B, BFut>(breaker: Arc<CircuitBreaker>, fallback: B) -> Self
    where
        B: Fn() -> BFut + Send + Sync + 'static,
        BFut: Future<Output = Result<T, E>> + Send + 'static,
    {
        Self {
            breaker,
            fallback: Arc::new(move || -> BoxFuture<'static, Result<T, E>> { Box::pin(fallback()) }),
            log_fallback: true,
        }
    }

    pub fn with_log_fallback(mut self, enabled: bool) -> Self {
        self.log_fallback = enabled;
        self
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub async fn execute_with_fallback<P, PFut>(&self, operation: P) -> FallbackResult<T, T, E>
    where
        P: FnOnce() -> PFut,
        PFut: Future<Output = Result<T, E>>,
    {
        let started = Instant::now();
        match self.breaker.execute(operation).await {
            Ok(value) => FallbackResult::settled(
                ResultSource::Primary,
                Ok(FallbackData::Primary(value)),
                None,
                started,
            ),
            Err(BreakerError::Operation(e)) => {
                FallbackResult::settled(ResultSource::Primary, Err(FallbackError::Primary(e)), None, started)
            }
            Err(BreakerError::Open { name, retry_after }) => {
                if self.log_fallback {
                    tracing::warn!(breaker = %name, ?retry_after, "Circuit open, using fallback");
                }
                let outcome = (self.fallback)()
                    .await
                    .map(FallbackData::Fallback)
                    .map_err(FallbackError::Fallback);
                let reason = FallbackError::CircuitOpen { name, retry_after };
                FallbackResult::settled(ResultSource::Fallback, outcome, Some(reason), started)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::circuit_breaker::CircuitBreakerConfig;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_fast_primary_wins() {
        let options = FallbackOptions::new(Duration::from_millis(100));
        let result = execute_with_fallback(
            || async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok::<_, String>("primary")
            },
            || async { Ok::<_, String>("fallback") },
            &options,
        )
        .await;

        assert!(result.success());
        assert_eq!(result.source(), ResultSource::Primary);
        assert!(result.error().is_none());
        assert_eq!(result.duration(), Duration::from_millis(10));
        assert_eq!(result.into_value().unwrap(), "primary");
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_primary_falls_back_and_is_discarded() {
        let finished = Arc::new(AtomicBool::new(false));
        let f = finished.clone();
        let options = FallbackOptions::new(Duration::from_millis(50)).with_timeout_error("search too slow");

        let result = execute_with_fallback(
            || async move {
                tokio::time::sleep(Duration::from_millis(500)).await;
                f.store(true, Ordering::SeqCst);
                Ok::<_, String>(vec![1, 2, 3])
            },
            || async { Ok::<_, String>(0usize) },
            &options,
        )
        .await;

        assert!(result.success());
        assert_eq!(result.source(), ResultSource::Fallback);
        assert_eq!(result.duration(), Duration::from_millis(50));
        assert_eq!(result.data(), Some(&FallbackData::Fallback(0)));
        assert!(matches!(result.error(), Some(FallbackError::Timeout { message, .. }) if message == "search too slow"));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_primary_error_is_not_retried_with_fallback() {
        let fallback_called = AtomicBool::new(false);
        let options = FallbackOptions::new(Duration::from_secs(1));
        let result = execute_with_fallback(
            || async { Err::<u8, _>("broken".to_string()) },
            || async {
                fallback_called.store(true, Ordering::SeqCst);
                Ok::<u8, String>(1)
            },
            &options,
        )
        .await;

        assert!(!result.success());
        assert_eq!(result.source(), ResultSource::Primary);
        assert!(matches!(result.error(), Some(FallbackError::Primary(e)) if e == "broken"));
        assert!(!fallback_called.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_fallback_is_hard_failure() {
        let executor = FallbackExecutor::new("templates", FallbackOptions::new(Duration::from_millis(5)));
        let result: FallbackResult<u8, u8, String> = executor
            .execute(
                || std::future::pending::<Result<u8, String>>(),
                || async { Err("cache empty".to_string()) },
            )
            .await;
        assert!(!result.success());
        assert!(result.is_fallback());
        assert_eq!(result.error().map(|e| e.code()), Some("FALLBACK_FAILED"));
        assert!(result.data().is_none());
        assert!(matches!(result.into_result(), Err(FallbackError::Fallback(e)) if e == "cache empty"));
    }

    #[tokio::test]
    async fn test_breaker_with_fallback_on_open() {
        let breaker = Arc::new(CircuitBreaker::new(
            "components",
            CircuitBreakerConfig {
                failure_threshold: 1,
                ..Default::default()
            },
        ));
        let guarded = CircuitBreakerWithFallback::new(breaker.clone(), || async {
            Ok::<_, String>("cached components".to_string())
        });

        let first = guarded
            .execute_with_fallback(|| async { Err::<String, _>("down".to_string()) })
            .await;
        assert_eq!(first.source(), ResultSource::Primary);
        assert!(matches!(first.error(), Some(FallbackError::Primary(_))));

        let calls = AtomicU32::new(0);
        let second = guarded
            .execute_with_fallback(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>("live".to_string())
            })
            .await;
        assert!(second.success());
        assert_eq!(second.source(), ResultSource::Fallback);
        assert_eq!(second.error().map(|e| e.code()), Some("CIRCUIT_BREAKER_OPEN"));
        assert_eq!(second.into_value().unwrap(), "cached components");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}

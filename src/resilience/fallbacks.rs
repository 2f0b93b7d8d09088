//! Ready-made fallbacks.
//!
//! Each factory returns a closure usable both with
//! [`execute_with_fallback`](super::fallback::execute_with_fallback) and as the
//! registered fallback of a
//! [`CircuitBreakerWithFallback`](super::fallback::CircuitBreakerWithFallback).
//! None of them hold state beyond what they capture.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::future::BoxFuture;

use crate::resilience::backoff::exponential_delay;
use crate::resilience::error::CacheMissError;

/// Last-known-good values keyed by string, shared between the primary path
/// (which stores) and the cache fallback (which reads).
#[derive(Debug)]
pub struct FallbackCache<V> {
    inner: Arc<DashMap<String, V>>,
}

impl<V> Clone for FallbackCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<V> Default for FallbackCache<V> {
    fn default() -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
        }
    }
}

impl<V: Clone> FallbackCache<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, key: impl Into<String>, value: V) {
        self.inner.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.inner.get(key).map(|r| r.value().clone())
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        self.inner.remove(key).map(|(_, v)| v)
    }

    /// Store a successful result under `key`, passing the result through.
    pub fn remember<E>(&self, key: &str, result: Result<V, E>) -> Result<V, E> {
        if let Ok(value) = &result {
            self.put(key, value.clone());
        }
        result
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn clear(&self) {
        self.inner.clear();
    }
}

/// Serve the cached value for `key`, else `default`, else a [`CacheMissError`].
pub fn cached<V, E>(
    cache: FallbackCache<V>,
    key: impl Into<String>,
    default: Option<V>,
) -> impl Fn() -> BoxFuture<'static, Result<V, E>> + Send + Sync + 'static
where
    V: Clone + Send + Sync + 'static,
    E: From<CacheMissError> + Send + 'static,
{
    let key = key.into();
    move || -> BoxFuture<'static, Result<V, E>> {
        let outcome = match cache.get(&key).or_else(|| default.clone()) {
            Some(value) => Ok(value),
            None => Err(E::from(CacheMissError { key: key.clone() })),
        };
        Box::pin(async move { outcome })
    }
}

/// Always resolve to a clone of `value`.
pub fn default_value<T, E>(value: T) -> impl Fn() -> BoxFuture<'static, Result<T, E>> + Send + Sync + 'static
where
    T: Clone + Send + Sync + 'static,
    E: Send + 'static,
{
    move || -> BoxFuture<'static, Result<T, E>> {
        let value = value.clone();
        Box::pin(async move { Ok(value) })
    }
}

/// Resolve to an empty collection (or any `Default` value).
pub fn empty<C, E>() -> impl Fn() -> BoxFuture<'static, Result<C, E>> + Send + Sync + 'static
where
    C: Default + Send + 'static,
    E: Send + 'static,
{
    || -> BoxFuture<'static, Result<C, E>> { Box::pin(async { Ok(C::default()) }) }
}

/// Re-invoke `operation` with exponential backoff as the fallback.
pub fn retrying<Op, Fut, T, E>(
    operation: Op,
    max_retries: u32,
    base_delay: Duration,
) -> impl Fn() -> BoxFuture<'static, Result<T, E>> + Send + Sync + 'static
where
    Op: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    let operation = Arc::new(operation);
    move || -> BoxFuture<'static, Result<T, E>> {
        let operation = operation.clone();
        Box::pin(async move { retry_with_backoff(|| (*operation)(), max_retries, base_delay).await })
    }
}

/// One attempt plus up to `max_retries` retries; sleeps `base * 2^n` before
/// retry `n`. The last error is returned if every attempt fails.
pub async fn retry_with_backoff<Op, Fut, T, E>(mut operation: Op, max_retries: u32, base_delay: Duration) -> Result<T, E>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= max_retries => {
                tracing::debug!(attempts = attempt + 1, "Retries exhausted");
                return Err(e);
            }
            Err(_) => {
                let delay = exponential_delay(attempt, base_delay);
                tracing::debug!(attempt = attempt + 1, delay = ?delay, "Retrying after failure");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

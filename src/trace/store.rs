//! Bounded table of live execution contexts.
//!
//! # Design Decisions
//! - Keyed by correlation id
//! - At capacity the oldest entry by insertion order is evicted
//! - Setting an existing key replaces it and counts as a fresh insertion
//! - "Active" is the most recently set context that is still stored

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::context::ExecutionContext;

#[derive(Debug, Default)]
struct StoreInner {
    contexts: HashMap<String, ExecutionContext>,
    order: VecDeque<String>,
    active: Option<String>,
}

impl StoreInner {
    fn remove(&mut self, correlation_id: &str) -> Option<ExecutionContext> {
        let removed = self.contexts.remove(correlation_id)?;
        self.order.retain(|k| k != correlation_id);
        if self.active.as_deref() == Some(correlation_id) {
            self.active = None;
        }
        Some(removed)
    }
}

#[derive(Debug)]
pub struct TraceContextStore {
    capacity: usize,
    inner: Mutex<StoreInner>,
}

impl TraceContextStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(StoreInner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `context` and make it the active one.
    pub fn set(&self, context: ExecutionContext) {
        let mut inner = self.lock();
        let key = context.correlation_id.clone();

        if inner.contexts.contains_key(&key) {
            inner.order.retain(|k| k != &key);
        }
        while inner.contexts.len() >= self.capacity && !inner.contexts.contains_key(&key) {
            let Some(oldest) = inner.order.pop_front() else {
                break;
            };
            inner.contexts.remove(&oldest);
            if inner.active.as_deref() == Some(oldest.as_str()) {
                inner.active = None;
            }
            tracing::trace!(correlation_id = %oldest, "Evicted trace context");
        }

        inner.order.push_back(key.clone());
        inner.contexts.insert(key.clone(), context);
        inner.active = Some(key);
    }

    pub fn get(&self, correlation_id: &str) -> Option<ExecutionContext> {
        self.lock().contexts.get(correlation_id).cloned()
    }

    pub fn active(&self) -> Option<ExecutionContext> {
        let inner = self.lock();
        inner
            .active
            .as_ref()
            .and_then(|key| inner.contexts.get(key))
            .cloned()
    }

    /// Look up by id, or fall back to the active context.
    pub fn get_or_active(&self, correlation_id: Option<&str>) -> Option<ExecutionContext> {
        match correlation_id {
            Some(id) => self.get(id),
            None => self.active(),
        }
    }

    pub fn clear(&self, correlation_id: &str) -> Option<ExecutionContext> {
        self.lock().remove(correlation_id)
    }

    /// Remove `context` only if its correlation id still maps to its span.
    ///
    /// A later `set` under the same correlation id (a concurrent request
    /// continuing the same flow) is left in place.
    pub fn clear_context(&self, context: &ExecutionContext) -> Option<ExecutionContext> {
        let mut inner = self.lock();
        let owned = inner
            .contexts
            .get(&context.correlation_id)
            .is_some_and(|stored| stored.span_id == context.span_id);
        if owned {
            inner.remove(&context.correlation_id)
        } else {
            None
        }
    }

    pub fn clear_all(&self) {
        let mut inner = self.lock();
        inner.contexts.clear();
        inner.order.clear();
        inner.active = None;
    }

    pub fn len(&self) -> usize {
        self.lock().contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

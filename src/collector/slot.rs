//! Single-slot hand-off between the collection worker and live consumers
//!
//! Pushing never blocks and replaces any value that has not been taken
//! yet. Taking always yields the newest value.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug)]
struct SlotState<T> {
    value: Option<T>,
    pushed: u64,
    evicted: u64,
}

/// Lossy latest-value queue with capacity one
#[derive(Debug)]
pub struct LatestSlot<T> {
    inner: Arc<(Mutex<SlotState<T>>, Condvar)>,
}

impl<T> Clone for LatestSlot<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for LatestSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LatestSlot<T> {
    /// Create an empty slot
    pub fn new() -> Self {
        Self {
            inner: Arc::new((
                Mutex::new(SlotState {
                    value: None,
                    pushed: 0,
                    evicted: 0,
                }),
                Condvar::new(),
            )),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotState<T>> {
        self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a value, replacing any unread one
    ///
    /// Returns true if an unread value was evicted.
    pub fn push(&self, value: T) -> bool {
        let evicted = {
            let mut state = self.lock();
            let evicted = state.value.replace(value).is_some();
            state.pushed += 1;
            if evicted {
                state.evicted += 1;
            }
            evicted
        };
        self.inner.1.notify_all();
        evicted
    }

    /// Take the pending value without waiting
    pub fn take(&self) -> Option<T> {
        self.lock().value.take()
    }

    /// Wait up to `timeout` for a value and take it
    pub fn wait(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if let Some(v) = state.value.take() {
                return Some(v);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _) = self
                .inner
                .1
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
    }

    /// Whether a value is waiting
    pub fn is_pending(&self) -> bool {
        self.lock().value.is_some()
    }

    /// Total values pushed
    pub fn pushed_count(&self) -> u64 {
        self.lock().pushed
    }

    /// Values that were replaced before being taken
    pub fn evicted_count(&self) -> u64 {
        self.lock().evicted
    }
}

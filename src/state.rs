//! Shared application state access.
//!
//! The pipeline never reads state piecemeal: every read goes through
//! [`StateAccess::snapshot`], which must return one complete value even while
//! other threads are writing.

use parking_lot::RwLock;
use std::sync::Arc;

/// Single consistent read of externally-owned state.
pub trait StateAccess: Send + Sync + 'static {
    type State;

    fn snapshot(&self) -> Self::State;
}

/// Reader-writer guarded state. Clones share the same value.
pub struct SharedState<S> {
    inner: Arc<RwLock<S>>,
}

impl<S> SharedState<S> {
    pub fn new(initial: S) -> Self {
        Self {
            inner: Arc::new(RwLock::new(initial)),
        }
    }

    /// Mutate under the write lock. Readers see the value before or after, never between.
    pub fn update<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        let mut guard = self.inner.write();
        f(&mut guard)
    }

    /// Swap in a new value, returning the old one.
    pub fn replace(&self, value: S) -> S {
        std::mem::replace(&mut *self.inner.write(), value)
    }

    /// Run `f` against the current value without cloning it.
    pub fn read<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(&self.inner.read())
    }
}

impl<S> Clone for SharedState<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S: Default> Default for SharedState<S> {
    fn default() -> Self {
        Self::new(S::default())
    }
}

impl<S> StateAccess for SharedState<S>
where
    S: Clone + Send + Sync + 'static,
{
    type State = S;

    fn snapshot(&self) -> S {
        self.inner.read().clone()
    }
}

//! Per-operation-type reuse pools.
//!
//! Operations are short-lived state machines requested at high frequency, so
//! instances are checked out of a pool, used for exactly one run, and returned
//! when the last holder of their handle releases it. The [`Reset`] contract is
//! load-bearing: a returned instance must scrub every field back to its
//! default so a later checkout cannot observe stale results, dependencies, or
//! sub-operation handles.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Scrubs an operation back to its just-constructed state.
///
/// Implementations must release every handle the operation acquired during
/// its run and set every field to its default value.
pub trait Reset {
    /// Resets the instance for reuse.
    fn reset(&mut self);
}

/// Checkout/return counters for a pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Instances constructed because the free list was empty.
    pub created: u64,
    /// Checkouts served from the free list.
    pub reused: u64,
}

/// Reuse pool for one operation type.
///
/// Instances are `Arc<Mutex<O>>` so in-flight continuations can re-enter
/// them; the checkout discipline guarantees a checked-out instance has a
/// single logical owner at any time.
pub struct OperationPool<O> {
    free: Mutex<Vec<Arc<Mutex<O>>>>,
    created: AtomicU64,
    reused: AtomicU64,
}

impl<O: Reset + Default + Send> OperationPool<O> {
    /// Creates an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            created: AtomicU64::new(0),
            reused: AtomicU64::new(0),
        }
    }

    /// Checks out an instance, constructing one if the free list is empty.
    /// Returned instances are fully reset.
    pub fn acquire(&self) -> Arc<Mutex<O>> {
        let recycled = self.free.lock().pop();
        if let Some(instance) = recycled {
            self.reused.fetch_add(1, Ordering::Relaxed);
            instance
        } else {
            self.created.fetch_add(1, Ordering::Relaxed);
            Arc::new(Mutex::new(O::default()))
        }
    }

    /// Returns an instance to the pool, resetting it first.
    pub fn release(&self, instance: Arc<Mutex<O>>) {
        instance.lock().reset();
        self.free.lock().push(instance);
    }

    /// Number of instances currently on the free list.
    #[must_use]
    pub fn idle(&self) -> usize {
        self.free.lock().len()
    }

    /// Lifetime checkout counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            created: self.created.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
        }
    }
}

impl<O: Reset + Default + Send> Default for OperationPool<O> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct ScratchOperation {
        result: Option<String>,
        attempts: u32,
    }

    impl Reset for ScratchOperation {
        fn reset(&mut self) {
            self.result = None;
            self.attempts = 0;
        }
    }

    #[test]
    fn acquire_constructs_when_empty() {
        let pool = OperationPool::<ScratchOperation>::new();
        let op = pool.acquire();
        assert!(op.lock().result.is_none());
        assert_eq!(pool.stats(), PoolStats { created: 1, reused: 0 });
    }

    #[test]
    fn release_then_acquire_reuses_the_instance() {
        let pool = OperationPool::<ScratchOperation>::new();
        let op = pool.acquire();
        let raw = Arc::as_ptr(&op);

        pool.release(op);
        assert_eq!(pool.idle(), 1);

        let again = pool.acquire();
        assert_eq!(Arc::as_ptr(&again), raw);
        assert_eq!(pool.stats(), PoolStats { created: 1, reused: 1 });
    }

    #[test]
    fn released_instances_come_back_reset() {
        let pool = OperationPool::<ScratchOperation>::new();
        let op = pool.acquire();
        {
            let mut guard = op.lock();
            guard.result = Some("stale".to_string());
            guard.attempts = 3;
        }

        pool.release(op);
        let again = pool.acquire();
        let guard = again.lock();
        assert!(guard.result.is_none());
        assert_eq!(guard.attempts, 0);
    }
}

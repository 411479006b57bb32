//! Operation handles: reference-counted completion cells.
//!
//! An [`OpHandle<T>`] is the unit of asynchronous completion. It starts
//! `Pending`, completes exactly once with `(value, success, message)`, and
//! invokes registered continuations in registration order. Completion state is
//! an explicit enum rather than call-order discipline, so a handle can be
//! inspected at any time from any continuation.
//!
//! Handles are shared by multiple logical consumers. Sharing is governed by an
//! explicit acquire/release count, separate from the `Arc` that backs the
//! cheap `Clone`: every `acquire` must be paired with exactly one `release`,
//! and when the count returns to zero the handle's destroy hook runs once
//! (typically returning the backing operation to its pool).
//!
//! Continuations run with no internal lock held, so a continuation may
//! complete other handles or re-enter the engine. They must not assume a
//! clean call stack: the synchronous drain can fire them from arbitrary
//! depths of the pump loop.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::sync::Drainable;

/// Completion status of an operation handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpStatus {
    /// Not yet completed.
    Pending,
    /// Completed with `success = true`. The value may still be absent
    /// (soft "not found" results succeed with no value).
    Succeeded,
    /// Completed with `success = false`.
    Failed,
}

/// Single-shot callback invoked when a handle completes.
pub type Continuation = Box<dyn FnOnce() + Send>;

struct Done<T> {
    success: bool,
    value: Option<T>,
    message: Option<String>,
}

struct HandleState<T> {
    done: Option<Done<T>>,
    continuations: Vec<Continuation>,
}

struct Inner<T> {
    state: Mutex<HandleState<T>>,
    notify: Notify,
    /// Logical consumer count. Starts at 1 for the creator.
    refs: AtomicI32,
    destroy: Mutex<Option<Continuation>>,
    drain: Mutex<Option<Arc<dyn Drainable>>>,
}

/// Shared handle to a unit of asynchronous work.
///
/// `Clone` is cheap and does **not** affect the logical reference count; use
/// [`acquire`](Self::acquire)/[`release`](Self::release) to track consumers.
pub struct OpHandle<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for OpHandle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for OpHandle<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> OpHandle<T> {
    /// Creates a pending handle. The creator owns the initial reference and
    /// must eventually [`release`](Self::release) it.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(HandleState {
                    done: None,
                    continuations: Vec::new(),
                }),
                notify: Notify::new(),
                refs: AtomicI32::new(1),
                destroy: Mutex::new(None),
                drain: Mutex::new(None),
            }),
        }
    }

    /// Completes the handle. May be called at most once; a second call keeps
    /// the first result and is reported via `tracing::error!`.
    ///
    /// Continuations registered before completion run inline, in registration
    /// order, after the state has been published.
    pub fn complete(&self, value: Option<T>, success: bool, message: Option<String>) {
        let continuations = {
            let mut state = self.inner.state.lock();
            if state.done.is_some() {
                drop(state);
                tracing::error!("operation handle completed more than once; keeping the first result");
                return;
            }
            state.done = Some(Done {
                success,
                value,
                message,
            });
            std::mem::take(&mut state.continuations)
        };
        self.inner.notify.notify_waiters();
        for continuation in continuations {
            continuation();
        }
    }

    /// Completes successfully with a value.
    pub fn complete_ok(&self, value: T) {
        self.complete(Some(value), true, None);
    }

    /// Completes with `success = false` and a diagnostic message.
    pub fn complete_err(&self, message: impl Into<String>) {
        self.complete(None, false, Some(message.into()));
    }

    /// Returns `true` once the handle has completed (either way).
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.inner.state.lock().done.is_some()
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> OpStatus {
        match &self.inner.state.lock().done {
            None => OpStatus::Pending,
            Some(done) if done.success => OpStatus::Succeeded,
            Some(_) => OpStatus::Failed,
        }
    }

    /// Returns `true` if completed with `success = true`.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.status() == OpStatus::Succeeded
    }

    /// The diagnostic or informational message attached at completion, if any.
    /// Present on failures and on soft "not found" successes.
    #[must_use]
    pub fn message(&self) -> Option<String> {
        self.inner
            .state
            .lock()
            .done
            .as_ref()
            .and_then(|d| d.message.clone())
    }

    /// Registers a continuation. If the handle is already done, the
    /// continuation runs inline before this call returns.
    pub fn on_complete(&self, continuation: impl FnOnce() + Send + 'static) {
        let inline = {
            let mut state = self.inner.state.lock();
            if state.done.is_some() {
                Some(continuation)
            } else {
                state.continuations.push(Box::new(continuation));
                None
            }
        };
        if let Some(continuation) = inline {
            continuation();
        }
    }

    /// Waits asynchronously for completion. Returns immediately if the handle
    /// is already done. Completion is sticky, so this never misses a wakeup.
    pub async fn wait(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_done() {
                return;
            }
            notified.await;
        }
    }

    /// Adds a logical consumer reference.
    pub fn acquire(&self) {
        self.inner.refs.fetch_add(1, Ordering::SeqCst);
    }

    /// Drops a logical consumer reference. When the count reaches zero the
    /// destroy hook runs exactly once and the drain source is cleared.
    pub fn release(&self) {
        let prev = self.inner.refs.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0, "operation handle released more times than acquired");
        if prev == 1 {
            *self.inner.drain.lock() = None;
            let hook = self.inner.destroy.lock().take();
            if let Some(hook) = hook {
                hook();
            }
        } else if prev <= 0 {
            tracing::error!("operation handle released more times than acquired");
        }
    }

    /// Current logical reference count.
    #[must_use]
    pub fn ref_count(&self) -> i32 {
        self.inner.refs.load(Ordering::SeqCst)
    }

    /// Installs the hook that runs when the reference count reaches zero.
    pub fn set_destroy_hook(&self, hook: Continuation) {
        *self.inner.destroy.lock() = Some(hook);
    }

    /// Attaches the operation that can drive this handle to completion
    /// synchronously. Cleared automatically when the handle is destroyed.
    pub fn set_drain_source(&self, source: Arc<dyn Drainable>) {
        *self.inner.drain.lock() = Some(source);
    }

    /// Returns `true` if `self` and `other` are the same underlying handle.
    #[must_use]
    pub fn same(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T: Clone> OpHandle<T> {
    /// Clones the value attached at completion. `None` while pending or when
    /// the operation attached no value, as a soft "not found" does. Failed
    /// operations may still attach one, so check [`Self::succeeded`] rather
    /// than inferring the outcome from the value.
    #[must_use]
    pub fn result(&self) -> Option<T> {
        self.inner
            .state
            .lock()
            .done
            .as_ref()
            .and_then(|d| d.value.clone())
    }
}

impl<T: Send + 'static> OpHandle<T> {
    /// Type-erased view of this handle for heterogeneous aggregation.
    #[must_use]
    pub fn untyped(&self) -> UntypedHandle {
        Arc::new(self.clone())
    }
}

/// Type-erased operation handle: completion status without the result type.
///
/// Group operations and the synchronous drain only care about completion, not
/// payloads, so they hold children through this trait.
#[async_trait]
pub trait AnyHandle: Send + Sync {
    /// Current status.
    fn status(&self) -> OpStatus;

    /// Returns `true` once completed.
    fn is_done(&self) -> bool;

    /// Returns `true` if completed with `success = true`.
    fn succeeded(&self) -> bool;

    /// Message attached at completion, if any.
    fn message(&self) -> Option<String>;

    /// Adds a logical consumer reference.
    fn acquire(&self);

    /// Drops a logical consumer reference.
    fn release(&self);

    /// Current logical reference count.
    fn ref_count(&self) -> i32;

    /// Registers a continuation; runs inline if already done.
    fn on_complete_boxed(&self, continuation: Continuation);

    /// Completes the handle with `success = false` and the given diagnostic.
    /// Used by the drain when an operation cannot make progress.
    fn fail(&self, message: String);

    /// The operation that can drive this handle synchronously, if attached.
    fn drain_source(&self) -> Option<Arc<dyn Drainable>>;

    /// Waits asynchronously for completion.
    async fn wait(&self);
}

#[async_trait]
impl<T: Send + 'static> AnyHandle for OpHandle<T> {
    fn status(&self) -> OpStatus {
        OpHandle::status(self)
    }

    fn is_done(&self) -> bool {
        OpHandle::is_done(self)
    }

    fn succeeded(&self) -> bool {
        OpHandle::succeeded(self)
    }

    fn message(&self) -> Option<String> {
        OpHandle::message(self)
    }

    fn acquire(&self) {
        OpHandle::acquire(self);
    }

    fn release(&self) {
        OpHandle::release(self);
    }

    fn ref_count(&self) -> i32 {
        OpHandle::ref_count(self)
    }

    fn on_complete_boxed(&self, continuation: Continuation) {
        self.on_complete(continuation);
    }

    fn fail(&self, message: String) {
        self.complete(None, false, Some(message));
    }

    fn drain_source(&self) -> Option<Arc<dyn Drainable>> {
        self.inner.drain.lock().clone()
    }

    async fn wait(&self) {
        OpHandle::wait(self).await;
    }
}

/// Shared type-erased handle.
pub type UntypedHandle = Arc<dyn AnyHandle>;

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use super::*;

    #[test]
    fn completes_once_and_keeps_first_result() {
        let handle = OpHandle::<u32>::new();
        assert_eq!(handle.status(), OpStatus::Pending);

        handle.complete_ok(7);
        assert_eq!(handle.status(), OpStatus::Succeeded);
        assert_eq!(handle.result(), Some(7));

        // Second completion is ignored.
        handle.complete_err("late failure");
        assert_eq!(handle.status(), OpStatus::Succeeded);
        assert_eq!(handle.result(), Some(7));
        assert_eq!(handle.message(), None);
    }

    #[test]
    fn soft_not_found_succeeds_without_value() {
        let handle = OpHandle::<u32>::new();
        handle.complete(None, true, Some("Could not find it".to_string()));
        assert_eq!(handle.status(), OpStatus::Succeeded);
        assert_eq!(handle.result(), None);
        assert!(handle.message().unwrap().contains("Could not find"));
    }

    #[test]
    fn continuations_run_in_registration_order() {
        let handle = OpHandle::<()>::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second", "third"] {
            let log = Arc::clone(&log);
            handle.on_complete(move || log.lock().push(tag));
        }

        handle.complete_ok(());
        assert_eq!(*log.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn continuation_on_done_handle_runs_inline() {
        let handle = OpHandle::<()>::new();
        handle.complete_ok(());

        let fired = Arc::new(AtomicU32::new(0));
        let fired2 = Arc::clone(&fired);
        handle.on_complete(move || {
            fired2.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn destroy_hook_runs_when_refs_reach_zero() {
        let handle = OpHandle::<u32>::new();
        let destroyed = Arc::new(AtomicU32::new(0));
        let destroyed2 = Arc::clone(&destroyed);
        handle.set_destroy_hook(Box::new(move || {
            destroyed2.fetch_add(1, Ordering::SeqCst);
        }));

        handle.acquire();
        assert_eq!(handle.ref_count(), 2);

        handle.release();
        assert_eq!(destroyed.load(Ordering::SeqCst), 0);

        handle.release();
        assert_eq!(handle.ref_count(), 0);
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "released more times than acquired")]
    fn refcount_underflow_is_caught_in_debug() {
        let handle = OpHandle::<u32>::new();
        handle.release();
        handle.release();
    }

    #[test]
    fn untyped_view_tracks_the_same_state() {
        let handle = OpHandle::<String>::new();
        let untyped = handle.untyped();
        assert_eq!(untyped.status(), OpStatus::Pending);

        handle.complete_ok("done".to_string());
        assert!(untyped.is_done());
        assert!(untyped.succeeded());
    }

    #[test]
    fn fail_through_untyped_view() {
        let handle = OpHandle::<String>::new();
        let untyped = handle.untyped();
        untyped.fail("forced failure".to_string());
        assert_eq!(handle.status(), OpStatus::Failed);
        assert_eq!(handle.message().as_deref(), Some("forced failure"));
    }

    #[tokio::test]
    async fn wait_returns_after_completion() {
        let handle = OpHandle::<u32>::new();
        let waiter = handle.clone();
        let task = tokio::spawn(async move {
            waiter.wait().await;
            waiter.result()
        });

        // Give the waiter a chance to park before completing.
        tokio::task::yield_now().await;
        handle.complete_ok(99);

        assert_eq!(task.await.unwrap(), Some(99));
    }

    #[tokio::test]
    async fn wait_on_already_done_handle_returns_immediately() {
        let handle = OpHandle::<u32>::new();
        handle.complete_ok(1);
        handle.wait().await;
        assert_eq!(handle.result(), Some(1));
    }
}

//! Aggregation of many child operations into one completion event.
//!
//! A group completes when its last child completes, in any order. Failure is
//! not fail-fast: every child runs to completion, failed children contribute
//! their messages to one aggregate diagnostic, and the group's success flag
//! is the logical AND of child successes. The group's result is the child
//! handle list itself; callers re-inspect each child for its own payload.

use std::sync::Arc;

use parking_lot::Mutex;

use super::handle::{OpHandle, UntypedHandle};
use super::pool::Reset;
use super::sync::{force_completion, Drainable, SchedulerPump};

/// Pooled operation that waits on N heterogeneous child handles.
#[derive(Default)]
pub struct GroupOperation {
    handle: Option<OpHandle<Vec<UntypedHandle>>>,
    children: Vec<UntypedHandle>,
    pending: usize,
    started: bool,
    completing: bool,
}

impl GroupOperation {
    /// Begins waiting on `children`. Each child handle is acquired for the
    /// duration of the run and released when the operation is reset.
    /// Completes immediately if every child is already done.
    pub(crate) fn begin(
        operation: &Arc<Mutex<Self>>,
        handle: OpHandle<Vec<UntypedHandle>>,
        children: Vec<UntypedHandle>,
    ) {
        let waiting: Vec<UntypedHandle> = {
            let mut guard = operation.lock();
            for child in &children {
                child.acquire();
            }
            let waiting: Vec<UntypedHandle> =
                children.iter().filter(|c| !c.is_done()).cloned().collect();
            guard.handle = Some(handle);
            guard.children = children;
            guard.pending = waiting.len();
            guard.started = true;
            guard.completing = false;
            waiting
        };

        if waiting.is_empty() {
            Self::finish(operation);
            return;
        }
        for child in waiting {
            let operation = Arc::clone(operation);
            child.on_complete_boxed(Box::new(move || Self::on_child_done(&operation)));
        }
    }

    fn on_child_done(operation: &Arc<Mutex<Self>>) {
        let finished = {
            let mut guard = operation.lock();
            guard.pending = guard.pending.saturating_sub(1);
            guard.started && guard.pending == 0
        };
        if finished {
            Self::finish(operation);
        }
    }

    fn finish(operation: &Arc<Mutex<Self>>) {
        let (handle, children) = {
            let mut guard = operation.lock();
            if guard.completing {
                return;
            }
            guard.completing = true;
            let Some(handle) = guard.handle.clone() else {
                return;
            };
            (handle, guard.children.clone())
        };

        let mut failures = Vec::new();
        for child in &children {
            if child.is_done() && !child.succeeded() {
                failures.push(
                    child
                        .message()
                        .unwrap_or_else(|| "child operation failed".to_string()),
                );
            }
        }

        if failures.is_empty() {
            handle.complete(Some(children), true, None);
        } else {
            tracing::debug!(failed = failures.len(), "group completed with failed children");
            handle.complete(Some(children), false, Some(failures.join("\n")));
        }
    }
}

impl Reset for GroupOperation {
    fn reset(&mut self) {
        for child in self.children.drain(..) {
            child.release();
        }
        self.handle = None;
        self.pending = 0;
        self.started = false;
        self.completing = false;
    }
}

impl Drainable for Mutex<GroupOperation> {
    fn is_done(&self) -> bool {
        self.lock().handle.as_ref().is_some_and(OpHandle::is_done)
    }

    fn has_started(&self) -> bool {
        self.lock().started
    }

    fn current_operation(&self) -> Option<UntypedHandle> {
        // The group is suspended on all of its children at once; the drain
        // below walks them one by one instead of naming a single handle.
        None
    }

    fn fail(&self, message: &str) {
        let handle = self.lock().handle.clone();
        if let Some(handle) = handle {
            handle.complete(None, false, Some(message.to_string()));
        }
    }

    /// Child-by-child drain.
    ///
    /// A generic recursive drain can re-enter the scheduler unsafely when the
    /// pump itself fires a completion that tears this group down. Instead the
    /// children are walked with an explicit index, re-reading the child list
    /// before every step in case a callback invalidated it, and the scheduler
    /// is pumped once more before re-checking overall completion.
    fn drain(&self, pump: &dyn SchedulerPump, budget: usize) -> usize {
        let mut remaining = budget;
        let mut index = 0;
        loop {
            if Drainable::is_done(self) {
                break;
            }
            if remaining == 0 {
                self.fail("synchronous completion budget exhausted while draining group children");
                break;
            }
            let child = {
                let guard = self.lock();
                if !guard.started {
                    None
                } else {
                    guard.children.get(index).cloned()
                }
            };
            match child {
                Some(child) => {
                    remaining = force_completion(&child, pump, remaining);
                    index += 1;
                }
                None => {
                    pump.pump();
                    remaining -= 1;
                }
            }
        }
        remaining
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::op::handle::OpStatus;

    fn start_group(
        children: Vec<UntypedHandle>,
    ) -> (Arc<Mutex<GroupOperation>>, OpHandle<Vec<UntypedHandle>>) {
        let operation = Arc::new(Mutex::new(GroupOperation::default()));
        let handle = OpHandle::new();
        GroupOperation::begin(&operation, handle.clone(), children);
        (operation, handle)
    }

    #[test]
    fn completes_only_after_every_child_regardless_of_order() {
        let a = OpHandle::<u32>::new();
        let b = OpHandle::<u32>::new();
        let c = OpHandle::<u32>::new();
        let (_op, handle) = start_group(vec![a.untyped(), b.untyped(), c.untyped()]);

        // Complete out of registration order.
        b.complete_ok(2);
        assert!(!handle.is_done());
        c.complete_ok(3);
        assert!(!handle.is_done());
        a.complete_ok(1);

        assert_eq!(handle.status(), OpStatus::Succeeded);
        assert_eq!(handle.result().unwrap().len(), 3);
    }

    #[test]
    fn empty_group_completes_immediately() {
        let (_op, handle) = start_group(Vec::new());
        assert_eq!(handle.status(), OpStatus::Succeeded);
        assert!(handle.result().unwrap().is_empty());
    }

    #[test]
    fn already_done_children_are_counted() {
        let a = OpHandle::<u32>::new();
        a.complete_ok(1);
        let b = OpHandle::<u32>::new();
        let (_op, handle) = start_group(vec![a.untyped(), b.untyped()]);

        assert!(!handle.is_done());
        b.complete_ok(2);
        assert!(handle.succeeded());
    }

    #[test]
    fn one_failing_child_fails_the_group_but_all_run() {
        let a = OpHandle::<u32>::new();
        let b = OpHandle::<u32>::new();
        let c = OpHandle::<u32>::new();
        let (_op, handle) = start_group(vec![a.untyped(), b.untyped(), c.untyped()]);

        a.complete_err("table 'UI' failed to load");
        b.complete_ok(2);
        assert!(!handle.is_done(), "siblings are not aborted by a failure");
        c.complete_err("table 'Menus' failed to load");

        assert_eq!(handle.status(), OpStatus::Failed);
        let message = handle.message().unwrap();
        assert!(message.contains("table 'UI' failed to load"));
        assert!(message.contains("table 'Menus' failed to load"));
        // The result list is still available for inspection.
        assert_eq!(handle.result().unwrap().len(), 3);
    }

    #[test]
    fn reset_releases_children_and_scrubs_state() {
        let a = OpHandle::<u32>::new();
        let before = a.ref_count();
        let (op, _handle) = start_group(vec![a.untyped()]);
        assert_eq!(a.ref_count(), before + 1);

        a.complete_ok(1);
        op.lock().reset();

        assert_eq!(a.ref_count(), before);
        let guard = op.lock();
        assert!(guard.handle.is_none());
        assert!(guard.children.is_empty());
        assert!(!guard.started);
    }

    struct ChildPump {
        order: Mutex<VecDeque<OpHandle<u32>>>,
        pumps: AtomicUsize,
    }

    impl SchedulerPump for ChildPump {
        fn pump(&self) {
            self.pumps.fetch_add(1, Ordering::SeqCst);
            let next = self.order.lock().pop_front();
            if let Some(handle) = next {
                handle.complete_ok(0);
            }
        }
    }

    #[test]
    fn drain_forces_children_in_index_order() {
        let a = OpHandle::<u32>::new();
        let b = OpHandle::<u32>::new();
        let (op, handle) = start_group(vec![a.untyped(), b.untyped()]);

        let pump = ChildPump {
            order: Mutex::new(VecDeque::from(vec![a.clone(), b.clone()])),
            pumps: AtomicUsize::new(0),
        };

        let remaining = Drainable::drain(&*op, &pump, 16);
        assert!(handle.succeeded());
        assert!(remaining > 0);
        assert!(a.is_done() && b.is_done());
    }

    #[test]
    fn drain_fails_group_when_budget_runs_out() {
        let a = OpHandle::<u32>::new();
        let (op, handle) = start_group(vec![a.untyped()]);

        let pump = ChildPump {
            order: Mutex::new(VecDeque::new()),
            pumps: AtomicUsize::new(0),
        };

        Drainable::drain(&*op, &pump, 4);
        assert_eq!(handle.status(), OpStatus::Failed);
        assert!(handle.message().unwrap().contains("budget exhausted"));
    }
}

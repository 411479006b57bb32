//! Synchronous completion: forcing asynchronous operations to finish now.
//!
//! The engine is cooperative: work only progresses when the external backend
//! fires completions, normally from the host's update loop. The drain in this
//! module layers a blocking "finish now" mode on top by repeatedly pumping the
//! backend's scheduler and forcing the handles an operation names as its
//! `dependency` and `current_operation`.
//!
//! Two hard rules, both from the failure taxonomy:
//!
//! - A drain never hangs: every loop is bounded by a pump budget, and budget
//!   exhaustion completes the operation with `success = false`.
//! - A drain on a pending operation with nothing forceable is a programmer
//!   error and completes the operation with `success = false` and a
//!   diagnostic, never a panic.

use crate::op::handle::UntypedHandle;

/// Hook into the external scheduler that owns resource loads.
///
/// One `pump` advances the scheduler a single step, firing whatever
/// completions are ready. Completion callbacks run inside `pump`, so a pump
/// can re-enter the engine arbitrarily deep.
pub trait SchedulerPump: Send + Sync {
    /// Advances the external scheduler one step.
    fn pump(&self);
}

/// An operation that can be driven to completion synchronously.
///
/// Operations expose the handle they are suspended on (`current_operation`)
/// and the handle that must complete before they begin (`dependency`); the
/// drain forces those in the order the lifecycle contract requires.
pub trait Drainable: Send + Sync {
    /// Returns `true` once the operation's own handle has completed.
    fn is_done(&self) -> bool;

    /// Returns `true` once `execute` has begun.
    fn has_started(&self) -> bool;

    /// Handle that must complete before the operation begins, if any.
    fn dependency(&self) -> Option<UntypedHandle> {
        None
    }

    /// Handle the operation is currently suspended on, if any.
    fn current_operation(&self) -> Option<UntypedHandle>;

    /// Completes the operation's own handle with `success = false`.
    fn fail(&self, message: &str);

    /// Drives the operation to completion, spending at most `budget` pumps.
    /// Returns the unspent budget. Most operations delegate to
    /// [`drain_via_targets`]; the group operation substitutes its own
    /// child-by-child loop.
    fn drain(&self, pump: &dyn SchedulerPump, budget: usize) -> usize;
}

/// Pumps the scheduler until `handle` completes or the budget runs out.
/// Returns the unspent budget; the caller re-checks `handle.is_done()`.
pub fn force_completion(handle: &UntypedHandle, pump: &dyn SchedulerPump, budget: usize) -> usize {
    let mut remaining = budget;
    while !handle.is_done() && remaining > 0 {
        pump.pump();
        remaining -= 1;
    }
    remaining
}

/// The generic drain: force the dependency before the operation has begun,
/// the current sub-operation afterwards, and fail loudly when neither exists.
pub fn drain_via_targets<D: Drainable + ?Sized>(
    operation: &D,
    pump: &dyn SchedulerPump,
    budget: usize,
) -> usize {
    let mut remaining = budget;
    while !operation.is_done() {
        let target = if operation.has_started() {
            operation.current_operation()
        } else {
            operation.dependency().or_else(|| operation.current_operation())
        };
        match target {
            Some(handle) if !handle.is_done() => {
                if remaining == 0 {
                    operation.fail(
                        "synchronous completion budget exhausted while forcing a sub-operation",
                    );
                    break;
                }
                remaining = force_completion(&handle, pump, remaining);
            }
            Some(_) => {
                // The sub-operation finished but our continuation has not
                // advanced the machine yet; pump once more and re-check.
                if remaining == 0 {
                    operation
                        .fail("synchronous completion budget exhausted while waiting to advance");
                    break;
                }
                pump.pump();
                remaining -= 1;
            }
            None => {
                operation.fail(
                    "synchronous completion requested but the operation has no dependency \
                     or current sub-operation to force",
                );
                break;
            }
        }
    }
    remaining
}

/// Forces a handle to completion synchronously.
///
/// Handles produced by this crate carry their operation as a drain source and
/// are driven through the operation's own drain; bare backend handles are
/// forced by pumping alone. Returns `true` if the handle completed (with
/// either status) within the budget.
pub fn wait_for_completion(
    handle: &UntypedHandle,
    pump: &dyn SchedulerPump,
    budget: usize,
) -> bool {
    match handle.drain_source() {
        Some(operation) => {
            operation.drain(pump, budget);
        }
        None => {
            force_completion(handle, pump, budget);
        }
    }
    handle.is_done()
}

//! The operation framework: completion handles, pooling, grouping, and the
//! synchronous completion drain.
//!
//! Everything above this module (table loading, entry resolution, preloading)
//! is built from these four pieces:
//!
//! - [`handle`]: the unit of asynchronous completion
//! - [`pool`]: per-operation-type reuse pools
//! - [`group`]: aggregation of N child handles into one completion event
//! - [`sync`]: the "force completion now" drain layered over the async core

pub mod group;
pub mod handle;
pub mod pool;
pub mod sync;

pub use group::GroupOperation;
pub use handle::{AnyHandle, Continuation, OpHandle, OpStatus, UntypedHandle};
pub use pool::{OperationPool, PoolStats, Reset};
pub use sync::{force_completion, wait_for_completion, Drainable, SchedulerPump};

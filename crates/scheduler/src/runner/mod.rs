//! Scheduler engine -- ready queue, worker pool and the per-tick pump.
//!
//! Split into focused submodules:
//! - `core`: Scheduler handle, shared state, constructors and builders
//! - `execution`: the pump and dispatch to the sync/async contexts
//! - `shutdown`: graceful shutdown and stalled-worker diagnostics
//! - `queue`: the time-ordered ready queue
//! - `in_flight`: tracking of async work on the pool

mod core;
mod execution;
mod in_flight;
mod queue;
mod shutdown;

pub use self::core::Scheduler;
pub(crate) use self::core::Shared;
pub(crate) use self::queue::Dispatch;

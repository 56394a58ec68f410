//! Tick-driven task scheduler for plugin code running inside a host loop.
//!
//! Work is submitted as one-shot or periodic [tasks](TaskBuilder) or as
//! multi-step [recipes](RecipeBuilder). Every unit targets either the host's
//! own call path ([`ExecutionContext::Sync`]) or a fixed worker pool
//! ([`ExecutionContext::Async`]). The host calls [`Scheduler::pump`] once per
//! tick and [`Scheduler::shutdown`] once during teardown.

pub mod completion;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod recipe;
pub mod runner;
pub mod synchronizer;
pub mod task;
pub mod time;
pub mod types;

pub use completion::TaskHandle;
pub use error::{SchedulerError, TaskError};
pub use executor::{ErrorReporter, HostQueue, InlineExecutor, Job, SyncExecutor, TracingReporter};
pub use metrics::SchedulerMetrics;
pub use recipe::RecipeBuilder;
pub use runner::Scheduler;
pub use synchronizer::TaskSynchronizer;
pub use task::{Cancellable, PeriodicTaskBuilder, TaskBuilder};
pub use time::{ClockTimeSource, ManualTimeSource, TickUnit, TimeSource};
pub use tickloom_core::SchedulerConfig;
pub use types::{ExecutionContext, Owner, PumpReport, ShutdownStatus, StalledTask, TaskState};

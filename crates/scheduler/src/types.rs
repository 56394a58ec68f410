use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

/// Where a task body runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionContext {
    /// On the host's own call path, serialized with its per-tick work.
    Sync,
    /// On the worker pool, in parallel with other tasks and the pump.
    Async,
}

impl ExecutionContext {
    pub fn is_async(self) -> bool {
        self == ExecutionContext::Async
    }
}

impl fmt::Display for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionContext::Sync => write!(f, "sync"),
            ExecutionContext::Async => write!(f, "async"),
        }
    }
}

/// Identity of the component that submitted a task, used for error attribution.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Owner {
    name: Arc<str>,
}

impl Owner {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self { name: Arc::from(name.as_ref()) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl From<&str> for Owner {
    fn from(name: &str) -> Self {
        Owner::new(name)
    }
}

impl From<String> for Owner {
    fn from(name: String) -> Self {
        Owner::new(name)
    }
}

/// Lifecycle state of a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting in the ready queue (or in an executor's backlog).
    Pending,
    /// The body is executing.
    Running,
    /// Done, failed or cancelled. Never dispatched again.
    Terminal,
}

/// What a single `pump()` pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PumpReport {
    /// Tick the pass was evaluated at.
    pub tick: u64,
    pub dispatched_sync: usize,
    pub dispatched_async: usize,
    /// Cancelled entries dropped without dispatch.
    pub discarded: usize,
}

impl PumpReport {
    pub fn dispatched(&self) -> usize {
        self.dispatched_sync + self.dispatched_async
    }
}

/// Async work still outstanding when a shutdown wait expired.
#[derive(Debug, Clone)]
pub struct StalledTask {
    pub task_id: u64,
    pub owner: Owner,
    /// Worker thread running the task, `None` if it never started.
    pub worker: Option<String>,
    /// Wall time since the task started on its worker.
    pub running_for: Option<Duration>,
}

/// Result of [`Scheduler::shutdown`](crate::Scheduler::shutdown).
#[derive(Debug, Clone)]
pub enum ShutdownStatus {
    /// All in-flight async work finished within the timeout.
    Drained,
    /// The timeout elapsed with async work still running.
    TimedOut { stalled: Vec<StalledTask> },
}

impl ShutdownStatus {
    pub fn is_drained(&self) -> bool {
        matches!(self, ShutdownStatus::Drained)
    }
}

use crate::completion::TaskHandle;
use crate::runner::Scheduler;
use crate::types::{ExecutionContext, Owner};

/// Runs a function on a value in a chosen context for one owner.
///
/// Lets a caller off the host thread hand a value over to the host's sync
/// context (or push work off it) and wait for the outcome.
#[derive(Clone)]
pub struct TaskSynchronizer {
    scheduler: Scheduler,
    owner: Owner,
}

impl TaskSynchronizer {
    pub(crate) fn new(scheduler: Scheduler, owner: Owner) -> Self {
        Self { scheduler, owner }
    }

    pub fn owner(&self) -> &Owner {
        &self.owner
    }

    fn call<I, O, F>(&self, context: ExecutionContext, input: I, f: F) -> TaskHandle<O>
    where
        I: Send + 'static,
        O: Send + 'static,
        F: FnOnce(I) -> O + Send + 'static,
    {
        self.scheduler
            .schedule(&self.owner)
            .context(context)
            .supply(move || f(input))
    }

    /// Apply `f` to `input` on the host's sync context.
    pub fn run_sync<I, O, F>(&self, input: I, f: F) -> TaskHandle<O>
    where
        I: Send + 'static,
        O: Send + 'static,
        F: FnOnce(I) -> O + Send + 'static,
    {
        self.call(ExecutionContext::Sync, input, f)
    }

    /// Apply `f` to `input` on the worker pool.
    pub fn run_async<I, O, F>(&self, input: I, f: F) -> TaskHandle<O>
    where
        I: Send + 'static,
        O: Send + 'static,
        F: FnOnce(I) -> O + Send + 'static,
    {
        self.call(ExecutionContext::Async, input, f)
    }

    pub fn accept_sync<I, F>(&self, input: I, f: F) -> TaskHandle<()>
    where
        I: Send + 'static,
        F: FnOnce(I) + Send + 'static,
    {
        self.call(ExecutionContext::Sync, input, f)
    }

    pub fn accept_async<I, F>(&self, input: I, f: F) -> TaskHandle<()>
    where
        I: Send + 'static,
        F: FnOnce(I) + Send + 'static,
    {
        self.call(ExecutionContext::Async, input, f)
    }
}

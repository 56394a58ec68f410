//! Collaborator seams: the host's sync context and the error sink.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Mutex;

use tracing::error;

use crate::error::TaskError;
use crate::types::Owner;

/// A unit of work handed to an executor.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// The host's single-threaded call path.
///
/// Jobs posted here must run serialized with each other and with the host's
/// own tick, in posting order.
pub trait SyncExecutor: Send + Sync {
    fn post(&self, job: Job);
}

/// FIFO of sync jobs, drained by the host once per tick.
#[derive(Default)]
pub struct HostQueue {
    jobs: Mutex<VecDeque<Job>>,
}

impl HostQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every job posted so far, in order. Jobs posted while draining are
    /// left for the next call. A panicking job is logged and the rest of the
    /// batch still runs. Returns the number of jobs run.
    pub fn run_pending(&self) -> usize {
        let batch = std::mem::take(&mut *self.jobs.lock().unwrap_or_else(|e| e.into_inner()));
        let count = batch.len();
        for job in batch {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(job)) {
                let error = TaskError::from_panic(payload);
                error!(error = %error, "A host queue job panicked");
            }
        }
        count
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SyncExecutor for HostQueue {
    fn post(&self, job: Job) {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner()).push_back(job);
    }
}

/// Runs sync jobs immediately on the posting thread (the pump thread).
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl SyncExecutor for InlineExecutor {
    fn post(&self, job: Job) {
        job();
    }
}

/// Sink for task and recipe failures.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, owner: &Owner, task_id: u64, error: &TaskError);
}

/// Logs failures through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, owner: &Owner, task_id: u64, error: &TaskError) {
        let thread = std::thread::current();
        error!(
            owner = %owner,
            task_id,
            thread = thread.name().unwrap_or("<unnamed>"),
            error = %error,
            "An error occurred in a scheduled task"
        );
    }
}

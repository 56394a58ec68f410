//! One-shot and periodic tasks.
//!
//! A task moves through [`TaskState::Pending`] -> [`TaskState::Running`] ->
//! (`Pending` again for periodic tasks, or [`TaskState::Terminal`]). The
//! decision taken after the body returns lives in [`next_transition`], and
//! the only re-enqueue happens in the executor right after that decision, so
//! a periodic task never has two occurrences in flight.

use std::fmt::Display;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tracing::{debug, trace, warn};

use crate::completion::{Completion, TaskHandle, TaskView};
use crate::error::TaskError;
use crate::runner::{Dispatch, Shared};
use crate::time::TickUnit;
use crate::types::{ExecutionContext, Owner, TaskState};

type OnceBody<T> = Box<dyn FnOnce(&Cancellable) -> Result<T, TaskError> + Send>;
type RepeatBody<T> = Box<dyn FnMut(&Cancellable) -> Result<T, TaskError> + Send>;

enum Body<T> {
    Once(Option<OnceBody<T>>),
    Repeat(RepeatBody<T>),
}

trait CancelTarget: Send + Sync {
    fn cancel_task(&self) -> bool;
    fn task_cancelled(&self) -> bool;
}

/// Handed to cancellable bodies so they can end their own schedule.
#[derive(Clone)]
pub struct Cancellable {
    target: Arc<dyn CancelTarget>,
}

impl Cancellable {
    /// Cancel the task running this body. The current run finishes normally;
    /// no further occurrence is dispatched.
    pub fn cancel(&self) -> bool {
        self.target.cancel_task()
    }

    pub fn is_cancelled(&self) -> bool {
        self.target.task_cancelled()
    }
}

/// Decision taken once a body has returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transition {
    /// Periodic task ran cleanly: compute the next due tick and re-enqueue.
    Reschedule,
    Complete,
    Fail,
    Cancelled,
}

/// Pick the next state for a task whose body just returned.
///
/// A failed run ends a periodic schedule instead of skipping the failed
/// occurrence. This matches the established plugin scheduler behaviour and
/// is kept until owners agree on skip-and-continue semantics.
pub(crate) fn next_transition(period: u64, cancelled: bool, succeeded: bool) -> Transition {
    if !succeeded {
        Transition::Fail
    } else if cancelled {
        Transition::Cancelled
    } else if period > 0 {
        Transition::Reschedule
    } else {
        Transition::Complete
    }
}

pub(crate) struct TaskInner<T> {
    id: u64,
    owner: Owner,
    context: ExecutionContext,
    period: u64,
    next_run: AtomicU64,
    state: Mutex<TaskState>,
    body: Mutex<Body<T>>,
    completion: Completion<T>,
    scheduler: Weak<Shared>,
}

impl<T: Send + 'static> TaskInner<T> {
    fn lock_state(&self) -> MutexGuard<'_, TaskState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, next: TaskState) {
        *self.lock_state() = next;
    }

    /// Pending -> Running. Refuses terminal or already-running tasks.
    fn begin(&self) -> bool {
        let mut state = self.lock_state();
        if self.completion.is_done() {
            *state = TaskState::Terminal;
            return false;
        }
        if *state != TaskState::Pending {
            return false;
        }
        *state = TaskState::Running;
        true
    }

    fn abandon(&self) {
        self.completion.cancel();
        self.set_state(TaskState::Terminal);
    }

    fn call_body(self: &Arc<Self>) -> Result<T, TaskError> {
        let token = Cancellable {
            target: Arc::clone(self) as Arc<dyn CancelTarget>,
        };
        let mut body = self.body.lock().unwrap_or_else(|e| e.into_inner());
        let result = catch_unwind(AssertUnwindSafe(|| match &mut *body {
            Body::Once(slot) => match slot.take() {
                Some(f) => f(&token),
                None => Err(TaskError::Failed("one-shot body already consumed".into())),
            },
            Body::Repeat(f) => f(&token),
        }));
        result.unwrap_or_else(|payload| Err(TaskError::from_panic(payload)))
    }
}

impl<T: Send + 'static> CancelTarget for TaskInner<T> {
    fn cancel_task(&self) -> bool {
        self.completion.cancel()
    }

    fn task_cancelled(&self) -> bool {
        self.completion.is_cancelled()
    }
}

impl<T: Send + 'static> TaskView<T> for TaskInner<T> {
    fn id(&self) -> u64 {
        self.id
    }

    fn owner(&self) -> &Owner {
        &self.owner
    }

    fn context(&self) -> ExecutionContext {
        self.context
    }

    fn next_execution_time(&self) -> u64 {
        self.next_run.load(Ordering::Acquire)
    }

    fn state(&self) -> TaskState {
        let state = *self.lock_state();
        if state == TaskState::Pending && self.completion.is_done() {
            TaskState::Terminal
        } else {
            state
        }
    }

    fn completion(&self) -> &Completion<T> {
        &self.completion
    }
}

impl<T: Send + 'static> Dispatch for TaskInner<T> {
    fn id(&self) -> u64 {
        self.id
    }

    fn owner(&self) -> &Owner {
        &self.owner
    }

    fn context(&self) -> ExecutionContext {
        self.context
    }

    fn next_execution_time(&self) -> u64 {
        self.next_run.load(Ordering::Acquire)
    }

    fn is_terminal(&self) -> bool {
        self.completion.is_done()
    }

    fn cancel(&self) {
        self.abandon();
    }

    fn run(self: Arc<Self>) {
        let Some(shared) = self.scheduler.upgrade() else {
            self.abandon();
            return;
        };

        // Once shut down, only periodic tasks that are already due get a last run.
        if shared.is_shutdown()
            && (self.period == 0 || self.next_run.load(Ordering::Acquire) > shared.now())
        {
            debug!(task_id = self.id, owner = %self.owner, "scheduler shut down, cancelling task");
            self.abandon();
            return;
        }

        if !self.begin() {
            return;
        }

        let outcome = self.call_body();
        let transition = next_transition(self.period, self.completion.is_cancelled(), outcome.is_ok());

        match (transition, outcome) {
            (Transition::Reschedule, _) if self.context.is_async() && shared.is_shutdown() => {
                // The pool is closing; a re-enqueued occurrence could never run.
                self.abandon();
            }
            (Transition::Reschedule, _) => {
                let next = shared.now().saturating_add(self.period);
                self.next_run.store(next, Ordering::Release);
                self.set_state(TaskState::Pending);
                shared.record_reschedule();
                shared.enqueue(Arc::clone(&self) as Arc<dyn Dispatch>);
            }
            (Transition::Complete, Ok(value)) => {
                self.completion.complete(value);
                self.set_state(TaskState::Terminal);
            }
            (Transition::Fail, Err(error)) => {
                if self.period > 0 {
                    warn!(
                        task_id = self.id,
                        owner = %self.owner,
                        period = self.period,
                        "periodic task failed, no further occurrences will run"
                    );
                }
                shared.report_failure(&self.owner, self.id, &error);
                self.completion.fail(error);
                self.set_state(TaskState::Terminal);
            }
            _ => self.set_state(TaskState::Terminal),
        }
    }
}

fn runnable_body<F>(mut f: F) -> Body<()>
where
    F: FnMut() + Send + 'static,
{
    let body: RepeatBody<()> = Box::new(move |_: &Cancellable| {
        f();
        Ok(())
    });
    Body::Repeat(body)
}

fn cancellable_body<F>(mut f: F) -> Body<()>
where
    F: FnMut(&Cancellable) + Send + 'static,
{
    let body: RepeatBody<()> = Box::new(move |token: &Cancellable| {
        f(token);
        Ok(())
    });
    Body::Repeat(body)
}

fn fallible_body<F, E>(mut f: F) -> Body<()>
where
    F: FnMut() -> Result<(), E> + Send + 'static,
    E: Display,
{
    let body: RepeatBody<()> = Box::new(move |_: &Cancellable| f().map_err(TaskError::failed));
    Body::Repeat(body)
}

/// Builder for a task, obtained from [`Scheduler::schedule_sync`] or
/// [`Scheduler::schedule_async`].
///
/// [`Scheduler::schedule_sync`]: crate::Scheduler::schedule_sync
/// [`Scheduler::schedule_async`]: crate::Scheduler::schedule_async
#[must_use = "a task is only scheduled once `execute` or `supply` is called"]
pub struct TaskBuilder {
    shared: Arc<Shared>,
    owner: Owner,
    context: ExecutionContext,
    delay: u64,
}

impl TaskBuilder {
    pub(crate) fn new(shared: Arc<Shared>, owner: Owner, context: ExecutionContext) -> Self {
        Self {
            shared,
            owner,
            context,
            delay: 0,
        }
    }

    pub fn context(mut self, context: ExecutionContext) -> Self {
        self.context = context;
        self
    }

    pub fn synchronous(self) -> Self {
        self.context(ExecutionContext::Sync)
    }

    pub fn asynchronous(self) -> Self {
        self.context(ExecutionContext::Async)
    }

    /// First run no earlier than `ticks` after now (default 0: next pump).
    pub fn delay(mut self, ticks: u64) -> Self {
        self.delay = ticks;
        self
    }

    pub fn delay_in(self, amount: u64, unit: TickUnit) -> Self {
        let ticks = unit.to_ticks(amount, self.shared.config.ticks_per_second);
        self.delay(ticks)
    }

    /// Re-run every `ticks` after each successful run. 0 keeps it one-shot.
    pub fn repeat(self, ticks: u64) -> PeriodicTaskBuilder {
        PeriodicTaskBuilder {
            base: self,
            period: ticks,
        }
    }

    pub fn repeat_in(self, amount: u64, unit: TickUnit) -> PeriodicTaskBuilder {
        let ticks = unit.to_ticks(amount, self.shared.config.ticks_per_second);
        self.repeat(ticks)
    }

    pub fn execute<F>(self, body: F) -> TaskHandle<()>
    where
        F: FnMut() + Send + 'static,
    {
        self.submit(0, runnable_body(body))
    }

    pub fn execute_cancellable<F>(self, body: F) -> TaskHandle<()>
    where
        F: FnMut(&Cancellable) + Send + 'static,
    {
        self.submit(0, cancellable_body(body))
    }

    pub fn try_execute<F, E>(self, body: F) -> TaskHandle<()>
    where
        F: FnMut() -> Result<(), E> + Send + 'static,
        E: Display,
    {
        self.submit(0, fallible_body(body))
    }

    /// Run a value-producing body once; the value is available from the handle.
    pub fn supply<T, F>(self, body: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let body: OnceBody<T> = Box::new(move |_: &Cancellable| Ok(body()));
        self.submit(0, Body::Once(Some(body)))
    }

    /// Like [`supply`](Self::supply), with an `Err` failing the handle.
    pub fn try_supply<T, E, F>(self, body: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        E: Display,
        F: FnOnce() -> Result<T, E> + Send + 'static,
    {
        let body: OnceBody<T> = Box::new(move |_: &Cancellable| body().map_err(TaskError::failed));
        self.submit(0, Body::Once(Some(body)))
    }

    fn submit<T: Send + 'static>(self, period: u64, body: Body<T>) -> TaskHandle<T> {
        let shared = self.shared;
        let now = shared.now();
        let task = Arc::new(TaskInner {
            id: shared.next_id(),
            owner: self.owner,
            context: self.context,
            period,
            next_run: AtomicU64::new(now.saturating_add(self.delay)),
            state: Mutex::new(TaskState::Pending),
            body: Mutex::new(body),
            completion: Completion::new(),
            scheduler: Arc::downgrade(&shared),
        });
        trace!(
            owner = %task.owner,
            context = %task.context,
            delay = self.delay,
            period,
            "A task has been scheduled"
        );
        if shared.is_shutdown() {
            debug!(task_id = task.id, owner = %task.owner, "task submitted after shutdown, it will be cancelled on dispatch");
        }
        shared.enqueue(Arc::clone(&task) as Arc<dyn Dispatch>);
        TaskHandle::new(task)
    }
}

/// A [`TaskBuilder`] with a repeat period. Value-producing bodies are not
/// available here: a periodic task has no single result.
#[must_use = "a task is only scheduled once `execute` is called"]
pub struct PeriodicTaskBuilder {
    base: TaskBuilder,
    period: u64,
}

impl PeriodicTaskBuilder {
    pub fn delay(mut self, ticks: u64) -> Self {
        self.base = self.base.delay(ticks);
        self
    }

    pub fn delay_in(mut self, amount: u64, unit: TickUnit) -> Self {
        self.base = self.base.delay_in(amount, unit);
        self
    }

    pub fn period(&self) -> u64 {
        self.period
    }

    pub fn execute<F>(self, body: F) -> TaskHandle<()>
    where
        F: FnMut() + Send + 'static,
    {
        self.base.submit(self.period, runnable_body(body))
    }

    pub fn execute_cancellable<F>(self, body: F) -> TaskHandle<()>
    where
        F: FnMut(&Cancellable) + Send + 'static,
    {
        self.base.submit(self.period, cancellable_body(body))
    }

    pub fn try_execute<F, E>(self, body: F) -> TaskHandle<()>
    where
        F: FnMut() -> Result<(), E> + Send + 'static,
        E: Display,
    {
        self.base.submit(self.period, fallible_body(body))
    }
}

//! Multi-stage pipelines whose steps hop between the sync and async contexts.
//!
//! Each step is queued as its own one-shot unit, due at the next pump, in the
//! context it was declared with. The value produced by one step is carried to
//! the next; the last value completes the recipe's handle.

use std::any::Any;
use std::collections::VecDeque;
use std::fmt::Display;
use std::marker::PhantomData;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, trace};

use crate::completion::{Completion, TaskHandle, TaskView};
use crate::error::TaskError;
use crate::runner::{Dispatch, Shared};
use crate::types::{ExecutionContext, Owner, TaskState};

type Value = Box<dyn Any + Send>;

enum StepAction {
    /// Observe the value, pass it on unchanged.
    Accept(Box<dyn FnOnce(&Value) -> Result<(), TaskError> + Send>),
    /// Replace the value.
    Apply(Box<dyn FnOnce(Value) -> Result<Value, TaskError> + Send>),
    /// Ignore the value, pass it on unchanged.
    Run(Box<dyn FnOnce() + Send>),
}

struct Step {
    context: ExecutionContext,
    action: StepAction,
}

impl Step {
    fn apply(self, value: Value) -> Result<Value, TaskError> {
        match self.action {
            StepAction::Accept(f) => {
                f(&value)?;
                Ok(value)
            }
            StepAction::Apply(f) => f(value),
            StepAction::Run(f) => {
                f();
                Ok(value)
            }
        }
    }
}

/// The typed end of a recipe, seen by the untyped step driver.
trait RecipeSink: Send + Sync {
    fn id(&self) -> u64;
    fn owner(&self) -> &Owner;
    fn is_terminal(&self) -> bool;
    fn mark_due(&self, tick: u64);
    fn finish(&self, value: Value);
    fn fail(&self, error: TaskError);
    fn cancel(&self);
}

struct RecipeShared<V> {
    id: u64,
    owner: Owner,
    context: ExecutionContext,
    last_due: AtomicU64,
    completion: Completion<V>,
}

impl<V: Send + 'static> RecipeSink for RecipeShared<V> {
    fn id(&self) -> u64 {
        self.id
    }

    fn owner(&self) -> &Owner {
        &self.owner
    }

    fn is_terminal(&self) -> bool {
        self.completion.is_done()
    }

    fn mark_due(&self, tick: u64) {
        self.last_due.store(tick, Ordering::Release);
    }

    fn finish(&self, value: Value) {
        match value.downcast::<V>() {
            Ok(v) => {
                self.completion.complete(*v);
            }
            Err(_) => {
                self.completion.fail(TaskError::type_mismatch::<V>());
            }
        }
    }

    fn fail(&self, error: TaskError) {
        self.completion.fail(error);
    }

    fn cancel(&self) {
        self.completion.cancel();
    }
}

impl<V: Send + 'static> TaskView<V> for RecipeShared<V> {
    fn id(&self) -> u64 {
        self.id
    }

    fn owner(&self) -> &Owner {
        &self.owner
    }

    /// Context of the final step, where the result is produced.
    fn context(&self) -> ExecutionContext {
        self.context
    }

    fn next_execution_time(&self) -> u64 {
        self.last_due.load(Ordering::Acquire)
    }

    fn state(&self) -> TaskState {
        if self.completion.is_done() {
            TaskState::Terminal
        } else {
            TaskState::Pending
        }
    }

    fn completion(&self) -> &Completion<V> {
        &self.completion
    }
}

/// Queue the next step, or settle the recipe if none is left.
fn advance(scheduler: &Weak<Shared>, sink: Arc<dyn RecipeSink>, mut rest: VecDeque<Step>, value: Value) {
    if sink.is_terminal() {
        return;
    }
    let Some(step) = rest.pop_front() else {
        sink.finish(value);
        return;
    };
    let Some(shared) = scheduler.upgrade() else {
        sink.cancel();
        return;
    };
    if shared.is_shutdown() {
        debug!(task_id = sink.id(), owner = %sink.owner(), "scheduler shut down, cancelling recipe");
        sink.cancel();
        return;
    }

    let due = shared.now();
    sink.mark_due(due);
    let unit = StepUnit {
        id: sink.id(),
        owner: sink.owner().clone(),
        context: step.context,
        due,
        scheduler: scheduler.clone(),
        sink,
        payload: Mutex::new(Some(Payload { step, value, rest })),
    };
    shared.enqueue(Arc::new(unit));
}

struct Payload {
    step: Step,
    value: Value,
    rest: VecDeque<Step>,
}

/// One recipe step as a queue entry.
struct StepUnit {
    id: u64,
    owner: Owner,
    context: ExecutionContext,
    due: u64,
    scheduler: Weak<Shared>,
    sink: Arc<dyn RecipeSink>,
    payload: Mutex<Option<Payload>>,
}

impl Dispatch for StepUnit {
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
        self.due
    }

    fn is_terminal(&self) -> bool {
        self.sink.is_terminal()
    }

    fn cancel(&self) {
        self.sink.cancel();
    }

    fn run(self: Arc<Self>) {
        let payload = self.payload.lock().unwrap_or_else(|e| e.into_inner()).take();
        let Some(Payload { step, value, rest }) = payload else {
            return;
        };
        if self.sink.is_terminal() {
            return;
        }
        let Some(shared) = self.scheduler.upgrade() else {
            self.sink.cancel();
            return;
        };
        if shared.is_shutdown() {
            debug!(task_id = self.id, owner = %self.owner, "scheduler shut down, cancelling recipe");
            self.sink.cancel();
            return;
        }

        let outcome = catch_unwind(AssertUnwindSafe(move || step.apply(value)))
            .unwrap_or_else(|payload| Err(TaskError::from_panic(payload)));
        match outcome {
            Ok(next) => advance(&self.scheduler, Arc::clone(&self.sink), rest, next),
            Err(error) => {
                shared.report_failure(&self.owner, self.id, &error);
                self.sink.fail(error);
            }
        }
    }
}

/// Builder for a recipe carrying a value of type `V` at this point of the chain.
///
/// Plain `then_*` steps run in the sync context, `then_*_async` steps on the
/// worker pool.
#[must_use = "a recipe only starts once `execute` is called"]
pub struct RecipeBuilder<V> {
    shared: Arc<Shared>,
    owner: Owner,
    seed: Value,
    steps: Vec<Step>,
    _value: PhantomData<fn() -> V>,
}

impl<V: Send + 'static> RecipeBuilder<V> {
    pub(crate) fn new(shared: Arc<Shared>, owner: Owner, seed: V) -> Self {
        Self {
            shared,
            owner,
            seed: Box::new(seed),
            steps: Vec::new(),
            _value: PhantomData,
        }
    }

    fn push<R>(mut self, context: ExecutionContext, action: StepAction) -> RecipeBuilder<R> {
        self.steps.push(Step { context, action });
        RecipeBuilder {
            shared: self.shared,
            owner: self.owner,
            seed: self.seed,
            steps: self.steps,
            _value: PhantomData,
        }
    }

    fn accept_in<F>(self, context: ExecutionContext, f: F) -> Self
    where
        F: FnOnce(&V) + Send + 'static,
    {
        let action = StepAction::Accept(Box::new(move |value: &Value| {
            match (**value).downcast_ref::<V>() {
                Some(v) => {
                    f(v);
                    Ok(())
                }
                None => Err(TaskError::type_mismatch::<V>()),
            }
        }));
        self.push(context, action)
    }

    fn apply_in<R, E, F>(self, context: ExecutionContext, f: F) -> RecipeBuilder<R>
    where
        R: Send + 'static,
        E: Display,
        F: FnOnce(V) -> Result<R, E> + Send + 'static,
    {
        let action = StepAction::Apply(Box::new(move |value: Value| match value.downcast::<V>() {
            Ok(v) => f(*v)
                .map(|r| Box::new(r) as Value)
                .map_err(TaskError::failed),
            Err(_) => Err(TaskError::type_mismatch::<V>()),
        }));
        self.push(context, action)
    }

    fn run_in<F>(self, context: ExecutionContext, f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.push(context, StepAction::Run(Box::new(f)))
    }

    pub fn then_accept<F>(self, f: F) -> Self
    where
        F: FnOnce(&V) + Send + 'static,
    {
        self.accept_in(ExecutionContext::Sync, f)
    }

    pub fn then_accept_async<F>(self, f: F) -> Self
    where
        F: FnOnce(&V) + Send + 'static,
    {
        self.accept_in(ExecutionContext::Async, f)
    }

    pub fn then_apply<R, F>(self, f: F) -> RecipeBuilder<R>
    where
        R: Send + 'static,
        F: FnOnce(V) -> R + Send + 'static,
    {
        self.apply_in(ExecutionContext::Sync, move |v| Ok::<R, TaskError>(f(v)))
    }

    pub fn then_apply_async<R, F>(self, f: F) -> RecipeBuilder<R>
    where
        R: Send + 'static,
        F: FnOnce(V) -> R + Send + 'static,
    {
        self.apply_in(ExecutionContext::Async, move |v| Ok::<R, TaskError>(f(v)))
    }

    /// Fallible transform; an `Err` fails the recipe like a panic would.
    pub fn then_try_apply<R, E, F>(self, f: F) -> RecipeBuilder<R>
    where
        R: Send + 'static,
        E: Display,
        F: FnOnce(V) -> Result<R, E> + Send + 'static,
    {
        self.apply_in(ExecutionContext::Sync, f)
    }

    pub fn then_try_apply_async<R, E, F>(self, f: F) -> RecipeBuilder<R>
    where
        R: Send + 'static,
        E: Display,
        F: FnOnce(V) -> Result<R, E> + Send + 'static,
    {
        self.apply_in(ExecutionContext::Async, f)
    }

    pub fn then_run<F>(self, f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.run_in(ExecutionContext::Sync, f)
    }

    pub fn then_run_async<F>(self, f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.run_in(ExecutionContext::Async, f)
    }

    /// Number of steps declared so far.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Start the pipeline. With no steps the handle completes with the seed.
    pub fn execute(self) -> TaskHandle<V> {
        let shared = self.shared;
        let context = self
            .steps
            .last()
            .map(|step| step.context)
            .unwrap_or(ExecutionContext::Sync);
        let recipe = Arc::new(RecipeShared::<V> {
            id: shared.next_id(),
            owner: self.owner,
            context,
            last_due: AtomicU64::new(shared.now()),
            completion: Completion::new(),
        });
        trace!(
            task_id = recipe.id,
            owner = %recipe.owner,
            steps = self.steps.len(),
            "A recipe has been scheduled"
        );

        let sink: Arc<dyn RecipeSink> = Arc::clone(&recipe) as Arc<dyn RecipeSink>;
        advance(&Arc::downgrade(&shared), sink, self.steps.into(), self.seed);
        TaskHandle::new(recipe)
    }
}

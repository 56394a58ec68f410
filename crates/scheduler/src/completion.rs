//! Result slots and the handles callers hold on to.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use crate::error::TaskError;
use crate::types::{ExecutionContext, Owner, TaskState};

enum Slot<T> {
    Pending,
    Completed(T),
    Failed(TaskError),
    Cancelled,
    /// Completed, and the value has been moved out.
    Taken,
}

/// Write-once result of a task. The first terminal write wins.
pub(crate) struct Completion<T> {
    slot: Mutex<Slot<T>>,
    ready: Condvar,
}

impl<T> Completion<T> {
    pub(crate) fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::Pending),
            ready: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn settle(&self, next: Slot<T>) -> bool {
        let mut slot = self.lock();
        if !matches!(*slot, Slot::Pending) {
            return false;
        }
        *slot = next;
        self.ready.notify_all();
        true
    }

    pub(crate) fn complete(&self, value: T) -> bool {
        self.settle(Slot::Completed(value))
    }

    pub(crate) fn fail(&self, error: TaskError) -> bool {
        self.settle(Slot::Failed(error))
    }

    pub(crate) fn cancel(&self) -> bool {
        self.settle(Slot::Cancelled)
    }

    pub(crate) fn is_done(&self) -> bool {
        !matches!(*self.lock(), Slot::Pending)
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        matches!(*self.lock(), Slot::Cancelled)
    }

    pub(crate) fn is_failed(&self) -> bool {
        matches!(*self.lock(), Slot::Failed(_))
    }

    fn read(slot: &Slot<T>) -> Option<Result<T, TaskError>>
    where
        T: Clone,
    {
        match slot {
            Slot::Pending => None,
            Slot::Completed(v) => Some(Ok(v.clone())),
            Slot::Failed(e) => Some(Err(e.clone())),
            Slot::Cancelled => Some(Err(TaskError::Cancelled)),
            Slot::Taken => Some(Err(TaskError::Taken)),
        }
    }

    fn take_slot(slot: &mut Slot<T>) -> Option<Result<T, TaskError>> {
        match std::mem::replace(slot, Slot::Taken) {
            Slot::Pending => {
                *slot = Slot::Pending;
                None
            }
            Slot::Completed(v) => Some(Ok(v)),
            Slot::Failed(e) => {
                *slot = Slot::Failed(e.clone());
                Some(Err(e))
            }
            Slot::Cancelled => {
                *slot = Slot::Cancelled;
                Some(Err(TaskError::Cancelled))
            }
            Slot::Taken => Some(Err(TaskError::Taken)),
        }
    }

    /// Block until settled and move the value out. Later reads see `Taken`.
    pub(crate) fn take(&self) -> Result<T, TaskError> {
        let mut slot = self
            .ready
            .wait_while(self.lock(), |s| matches!(s, Slot::Pending))
            .unwrap_or_else(|e| e.into_inner());
        Self::take_slot(&mut slot).unwrap_or(Err(TaskError::Cancelled))
    }

    pub(crate) fn take_timeout(&self, timeout: Duration) -> Result<T, TaskError> {
        let (mut slot, _) = self
            .ready
            .wait_timeout_while(self.lock(), timeout, |s| matches!(s, Slot::Pending))
            .unwrap_or_else(|e| e.into_inner());
        Self::take_slot(&mut slot).unwrap_or(Err(TaskError::Timeout))
    }

    pub(crate) fn wait(&self) -> Result<T, TaskError>
    where
        T: Clone,
    {
        let slot = self
            .ready
            .wait_while(self.lock(), |s| matches!(s, Slot::Pending))
            .unwrap_or_else(|e| e.into_inner());
        Self::read(&slot).unwrap_or(Err(TaskError::Cancelled))
    }

    pub(crate) fn wait_timeout(&self, timeout: Duration) -> Result<T, TaskError>
    where
        T: Clone,
    {
        let (slot, _) = self
            .ready
            .wait_timeout_while(self.lock(), timeout, |s| matches!(s, Slot::Pending))
            .unwrap_or_else(|e| e.into_inner());
        Self::read(&slot).unwrap_or(Err(TaskError::Timeout))
    }
}

/// Read side shared by one-shot/periodic tasks and recipes.
pub(crate) trait TaskView<T>: Send + Sync {
    fn id(&self) -> u64;
    fn owner(&self) -> &Owner;
    fn context(&self) -> ExecutionContext;
    fn next_execution_time(&self) -> u64;
    fn state(&self) -> TaskState;
    fn completion(&self) -> &Completion<T>;
}

/// Handle to a scheduled task or recipe.
///
/// Cancelling is cooperative: it prevents future dispatch but never
/// interrupts a body that is already running.
pub struct TaskHandle<T> {
    inner: Arc<dyn TaskView<T>>,
}

impl<T> Clone for TaskHandle<T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<T> TaskHandle<T> {
    pub(crate) fn new(inner: Arc<dyn TaskView<T>>) -> Self {
        Self { inner }
    }

    pub fn id(&self) -> u64 {
        self.inner.id()
    }

    pub fn owner(&self) -> &Owner {
        self.inner.owner()
    }

    pub fn context(&self) -> ExecutionContext {
        self.inner.context()
    }

    /// Tick at which the task is (or was last) due.
    pub fn next_execution_time(&self) -> u64 {
        self.inner.next_execution_time()
    }

    pub fn state(&self) -> TaskState {
        self.inner.state()
    }

    /// Cancel the task. Returns `false` if it had already reached a terminal state.
    pub fn cancel(&self) -> bool {
        self.inner.completion().cancel()
    }

    /// True once the task is done, failed or cancelled.
    pub fn is_done(&self) -> bool {
        self.inner.completion().is_done()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.completion().is_cancelled()
    }

    pub fn is_failed(&self) -> bool {
        self.inner.completion().is_failed()
    }

    /// Block until the task reaches a terminal state.
    pub fn get(&self) -> Result<T, TaskError>
    where
        T: Clone,
    {
        self.inner.completion().wait()
    }

    /// Block up to `timeout`; returns [`TaskError::Timeout`] if still pending.
    pub fn get_timeout(&self, timeout: Duration) -> Result<T, TaskError>
    where
        T: Clone,
    {
        self.inner.completion().wait_timeout(timeout)
    }

    /// Block until the task settles and move its value out, for results that
    /// are not `Clone`. Only the first call on any clone of the handle gets
    /// the value; later `take`/`get` calls return [`TaskError::Taken`].
    pub fn take(&self) -> Result<T, TaskError> {
        self.inner.completion().take()
    }

    /// [`take`](Self::take) with a timeout; returns [`TaskError::Timeout`]
    /// and leaves the result in place if still pending.
    pub fn take_timeout(&self, timeout: Duration) -> Result<T, TaskError> {
        self.inner.completion().take_timeout(timeout)
    }
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id())
            .field("owner", self.owner())
            .field("context", &self.context())
            .field("state", &self.state())
            .finish()
    }
}

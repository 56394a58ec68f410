use std::any::Any;

/// Errors raised by the scheduler itself (never by task bodies).
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Failed to build worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
    #[error("Invalid config: {0}")]
    Config(#[from] tickloom_core::ConfigError),
}

/// Terminal failure of a task or recipe, as observed through its handle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    /// The body returned an error.
    #[error("Task failed: {0}")]
    Failed(String),
    /// The body panicked.
    #[error("Task panicked: {0}")]
    Panicked(String),
    #[error("Task cancelled")]
    Cancelled,
    /// `get_timeout` elapsed before the task reached a terminal state.
    #[error("Timed out waiting for task result")]
    Timeout,
    /// The result was already moved out with `take`.
    #[error("Task result already taken")]
    Taken,
    /// A recipe step received a value of an unexpected type.
    #[error("Recipe value type mismatch: expected {0}")]
    TypeMismatch(&'static str),
}

impl TaskError {
    pub(crate) fn failed(err: impl std::fmt::Display) -> Self {
        TaskError::Failed(err.to_string())
    }

    pub(crate) fn type_mismatch<T>() -> Self {
        TaskError::TypeMismatch(std::any::type_name::<T>())
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        TaskError::Panicked(message)
    }
}

use thiserror::Error;

use crate::models::TaskId;

/// Error type for opaque callables (step handlers, progress observers).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum CoreErrorKind {
    InvalidInput,
    StepFailure,
    Timeout,
    Cancelled,
    ShuttingDown,
    Internal,
}

#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error("{kind:?}: {message}")]
pub struct CoreError {
    pub task: Option<TaskId>,
    pub step: Option<String>,
    pub kind: CoreErrorKind,
    pub message: String,
}

impl CoreError {
    pub fn new(kind: CoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            task: None,
            step: None,
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(CoreErrorKind::InvalidInput, message)
    }

    pub fn for_task(mut self, task_id: &TaskId) -> Self {
        self.task.get_or_insert_with(|| task_id.clone());
        self
    }

    pub fn for_step(mut self, step: &str) -> Self {
        self.step.get_or_insert_with(|| step.to_string());
        self
    }
}

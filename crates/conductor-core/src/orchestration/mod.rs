pub mod gate;
pub mod manager;
pub mod progress;
mod record;
pub mod step_runner;
mod supervisor;

pub use gate::{ConcurrencyGate, GateSlot, GateStats};
pub use manager::{TaskManager, default_manager};
pub use progress::{
    ChannelProgressObserver, NoopProgressObserver, ObserverResult, ProgressEvent,
    ProgressObserver,
};
pub use step_runner::StepRunner;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::models::{CoreError, StepDefinition, TaskContext};

pub type OrchestrationResult<T> = Result<T, CoreError>;

#[derive(Clone, Debug)]
pub struct TaskSubmission {
    pub name: String,
    pub steps: Vec<StepDefinition>,
    pub context: TaskContext,
    pub overall_timeout: Option<Duration>,
}

impl TaskSubmission {
    pub fn new(name: impl Into<String>, steps: Vec<StepDefinition>) -> Self {
        Self {
            name: name.into(),
            steps,
            context: TaskContext::new(),
            overall_timeout: None,
        }
    }

    pub fn context(mut self, context: TaskContext) -> Self {
        self.context = context;
        self
    }

    pub fn overall_timeout(mut self, overall_timeout: Duration) -> Self {
        self.overall_timeout = Some(overall_timeout);
        self
    }

    pub fn validate(&self) -> OrchestrationResult<()> {
        if self.name.trim().is_empty() {
            return Err(CoreError::invalid_input("task name must not be empty"));
        }

        if self.steps.is_empty() {
            return Err(CoreError::invalid_input(format!(
                "task '{}' must have at least one step",
                self.name
            )));
        }

        if let Some(step) = self.steps.iter().find(|step| step.timeout.is_zero()) {
            return Err(CoreError::invalid_input(format!(
                "step '{}' timeout must be greater than zero",
                step.name
            ))
            .for_step(&step.name));
        }

        if let Some(timeout) = self.overall_timeout
            && timeout.is_zero()
        {
            return Err(CoreError::invalid_input(
                "overall timeout must be greater than zero when provided",
            ));
        }

        Ok(())
    }

    /// Explicit overall timeout, or the sum of every step timeout.
    pub fn effective_overall_timeout(&self) -> Duration {
        self.overall_timeout.unwrap_or_else(|| {
            self.steps
                .iter()
                .map(|step| step.timeout)
                .fold(Duration::ZERO, Duration::saturating_add)
        })
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CancellationMode {
    Immediate,
    Graceful { grace_period: Duration },
}

/// Cooperative cancellation flag shared between a task's record and its runner.
#[derive(Clone, Debug, Default)]
pub struct TaskCancellationToken {
    flag: Arc<AtomicBool>,
}

impl TaskCancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Sets the flag, returning false if it was already set.
    pub fn request(&self) -> bool {
        !self.flag.swap(true, Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

use crate::models::{CoreError, CoreErrorKind, StepDefinition, StepStatus, TaskContext, TaskId};
use crate::orchestration::progress::ProgressNotifier;
use crate::orchestration::{
    NoopProgressObserver, OrchestrationResult, ProgressObserver, TaskCancellationToken,
};

/// Runs one step with its per-attempt timeout and retry budget.
///
/// Every attempt executes on its own tokio task so a timed-out or abandoned attempt can be
/// aborted. The runner only reports the step's outcome; the supervisor decides what that
/// means for the task.
#[derive(Clone)]
pub struct StepRunner {
    task_id: TaskId,
    cancel: TaskCancellationToken,
    notifier: ProgressNotifier,
}

enum AttemptFailure {
    Error(String),
    TimedOut(Duration),
}

struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl StepRunner {
    pub fn new(task_id: TaskId, cancel: TaskCancellationToken) -> Self {
        Self {
            task_id,
            cancel,
            notifier: ProgressNotifier::new(Arc::new(NoopProgressObserver)),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.notifier = ProgressNotifier::new(observer);
        self
    }

    pub(crate) fn with_notifier(mut self, notifier: ProgressNotifier) -> Self {
        self.notifier = notifier;
        self
    }

    pub async fn run(
        &self,
        step_index: usize,
        step: &StepDefinition,
        previous: Value,
        context: Arc<TaskContext>,
    ) -> OrchestrationResult<Value> {
        let max_attempts = step.max_attempts();
        let mut attempt = 1;

        loop {
            let failure = match self.attempt(step, previous.clone(), context.clone()).await {
                Ok(output) => {
                    tracing::debug!(
                        task_id = %self.task_id,
                        step = %step.name,
                        attempt,
                        "step attempt succeeded"
                    );
                    return Ok(output);
                }
                Err(failure) => failure,
            };

            if attempt >= max_attempts {
                return Err(self.exhausted(step, attempt, failure));
            }

            if self.cancel.is_cancelled() {
                return Err(self.cancelled(step, attempt));
            }

            tracing::warn!(
                task_id = %self.task_id,
                step = %step.name,
                attempt,
                max_attempts,
                reason = %failure.describe(),
                "step attempt failed, retrying"
            );

            attempt += 1;
            self.notifier
                .step_update(&self.task_id, step_index, StepStatus::Retrying { attempt });

            if !step.retry_delay.is_zero() {
                sleep(step.retry_delay).await;
                if self.cancel.is_cancelled() {
                    return Err(self.cancelled(step, attempt - 1));
                }
            }
        }
    }

    async fn attempt(
        &self,
        step: &StepDefinition,
        previous: Value,
        context: Arc<TaskContext>,
    ) -> Result<Value, AttemptFailure> {
        let mut handle = AbortOnDrop(tokio::spawn(step.invoke(previous, context)));

        match timeout(step.timeout, &mut handle.0).await {
            Ok(Ok(Ok(output))) => Ok(output),
            Ok(Ok(Err(error))) => Err(AttemptFailure::Error(error.to_string())),
            Ok(Err(join_error)) if join_error.is_panic() => Err(AttemptFailure::Error(
                format!("step handler panicked: {join_error}"),
            )),
            Ok(Err(join_error)) => Err(AttemptFailure::Error(format!(
                "step handler was cancelled: {join_error}"
            ))),
            Err(_) => Err(AttemptFailure::TimedOut(step.timeout)),
        }
    }

    fn exhausted(&self, step: &StepDefinition, attempts: u32, failure: AttemptFailure) -> CoreError {
        let (kind, message) = match failure {
            AttemptFailure::Error(message) => (
                CoreErrorKind::StepFailure,
                format!(
                    "step '{}' failed after {attempts} attempt(s): {message}",
                    step.name
                ),
            ),
            AttemptFailure::TimedOut(limit) => (
                CoreErrorKind::Timeout,
                format!(
                    "step '{}' timed out after {limit:?} on each of {attempts} attempt(s)",
                    step.name
                ),
            ),
        };

        CoreError::new(kind, message)
            .for_task(&self.task_id)
            .for_step(&step.name)
    }

    fn cancelled(&self, step: &StepDefinition, attempts: u32) -> CoreError {
        CoreError::new(
            CoreErrorKind::Cancelled,
            format!(
                "cancelled while retrying step '{}' after {attempts} attempt(s)",
                step.name
            ),
        )
        .for_task(&self.task_id)
        .for_step(&step.name)
    }
}

impl AttemptFailure {
    fn describe(&self) -> String {
        match self {
            AttemptFailure::Error(message) => message.clone(),
            AttemptFailure::TimedOut(limit) => format!("timed out after {limit:?}"),
        }
    }
}

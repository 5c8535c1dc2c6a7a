use std::sync::Arc;

use serde_json::Value;
use tokio::time::timeout;

use crate::models::{CoreErrorKind, StepStatus, TaskState};
use crate::orchestration::ConcurrencyGate;
use crate::orchestration::progress::ProgressNotifier;
use crate::orchestration::record::TaskRecord;
use crate::orchestration::step_runner::StepRunner;

pub(crate) struct TaskSupervisor {
    record: Arc<TaskRecord>,
    gate: ConcurrencyGate,
    notifier: ProgressNotifier,
}

impl TaskSupervisor {
    pub(crate) fn new(
        record: Arc<TaskRecord>,
        gate: ConcurrencyGate,
        notifier: ProgressNotifier,
    ) -> Self {
        Self {
            record,
            gate,
            notifier,
        }
    }

    pub(crate) async fn run(self) {
        let record = &self.record;

        let slot = match self.gate.acquire().await {
            Ok(slot) => slot,
            Err(error) => {
                tracing::error!(
                    task_id = %record.id,
                    kind = ?error.kind,
                    message = %error.message,
                    "failed to acquire concurrency slot"
                );
                finalize(record, &self.notifier, TaskState::Failed, Some(error.message)).await;
                return;
            }
        };

        if !record.mark_running().await {
            tracing::debug!(task_id = %record.id, "task finished before it was admitted");
            return;
        }

        let step_names = record.step_names();
        tracing::info!(
            task_id = %record.id,
            name = %record.name,
            steps = step_names.len(),
            overall_timeout = ?record.overall_timeout,
            "task started"
        );
        self.notifier.task_start(
            &record.id,
            &record.name,
            &step_names,
            record.estimated_duration_ms(),
        );

        let (state, error) = match timeout(record.overall_timeout, self.run_steps()).await {
            Ok(outcome) => outcome,
            Err(_) => {
                if let Some(index) = record.in_flight_step().await {
                    self.notifier
                        .step_update(&record.id, index, StepStatus::Failed);
                }
                (
                    TaskState::Timeout,
                    Some(format!(
                        "task '{}' exceeded its overall timeout of {:?}",
                        record.name, record.overall_timeout
                    )),
                )
            }
        };

        slot.release();
        finalize(record, &self.notifier, state, error).await;
        record.detach_run().await;
    }

    async fn run_steps(&self) -> (TaskState, Option<String>) {
        let record = &self.record;
        let runner = StepRunner::new(record.id.clone(), record.cancel_requested.clone())
            .with_notifier(self.notifier.clone());
        let mut previous = Value::Null;

        for (index, step) in record.steps.iter().enumerate() {
            if record.is_cancel_requested() {
                return (
                    TaskState::Cancelled,
                    Some(format!("cancelled before step '{}'", step.name)),
                );
            }

            record.begin_step(index).await;
            self.notifier
                .step_update(&record.id, index, StepStatus::Running);

            match runner
                .run(index, step, previous, record.context.clone())
                .await
            {
                Ok(output) => {
                    record.complete_step(index, output.clone()).await;
                    self.notifier
                        .step_update(&record.id, index, StepStatus::Completed);
                    previous = output;
                }
                Err(error) => {
                    self.notifier
                        .step_update(&record.id, index, StepStatus::Failed);
                    let state = if error.kind == CoreErrorKind::Cancelled {
                        TaskState::Cancelled
                    } else {
                        TaskState::Failed
                    };
                    return (state, Some(error.message));
                }
            }
        }

        (TaskState::Completed, None)
    }
}

/// Publishes a terminal state: stamps the record, tells the observer, wakes waiters.
/// No-op when another path already finalized the task.
async fn finalize(
    record: &TaskRecord,
    notifier: &ProgressNotifier,
    state: TaskState,
    error: Option<String>,
) {
    if record.finish(state, error.clone()).await {
        announce_terminal(record, notifier, state, error.as_deref());
    }
}

pub(crate) fn announce_terminal(
    record: &TaskRecord,
    notifier: &ProgressNotifier,
    state: TaskState,
    error: Option<&str>,
) {
    match state {
        TaskState::Completed | TaskState::Cancelled => {
            tracing::info!(task_id = %record.id, name = %record.name, state = ?state, "task finished");
        }
        _ => {
            tracing::warn!(
                task_id = %record.id,
                name = %record.name,
                state = ?state,
                error = error.unwrap_or_default(),
                "task finished with error"
            );
        }
    }

    notifier.task_terminal(&record.id, state, error);
    record.wake_waiters();
}

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde_json::Value;
use tokio::sync::{Mutex, Notify};
use tokio::task::AbortHandle;
use tokio::time::{Instant, timeout_at};

use crate::models::{StepDefinition, TaskContext, TaskId, TaskResult, TaskState};
use crate::orchestration::{TaskCancellationToken, TaskSubmission};

/// Engine-owned run-time record. Identity and inputs are immutable; everything that
/// changes lives behind the record's own lock.
pub(crate) struct TaskRecord {
    pub(crate) id: TaskId,
    pub(crate) name: String,
    pub(crate) steps: Arc<[StepDefinition]>,
    pub(crate) context: Arc<TaskContext>,
    pub(crate) overall_timeout: Duration,
    pub(crate) created_at: SystemTime,
    pub(crate) cancel_requested: TaskCancellationToken,
    run_handle: Mutex<Option<AbortHandle>>,
    completion: Notify,
    progress: Mutex<TaskProgress>,
}

struct TaskProgress {
    state: TaskState,
    current_step_index: usize,
    steps_completed: usize,
    step_in_flight: bool,
    started_at: Option<SystemTime>,
    completed_at: Option<SystemTime>,
    last_result: Value,
    error: Option<String>,
}

impl TaskRecord {
    pub(crate) fn new(id: TaskId, submission: TaskSubmission) -> Self {
        let overall_timeout = submission.effective_overall_timeout();
        Self {
            id,
            name: submission.name,
            steps: submission.steps.into(),
            context: Arc::new(submission.context),
            overall_timeout,
            created_at: SystemTime::now(),
            cancel_requested: TaskCancellationToken::new(),
            run_handle: Mutex::new(None),
            completion: Notify::new(),
            progress: Mutex::new(TaskProgress {
                state: TaskState::Pending,
                current_step_index: 0,
                steps_completed: 0,
                step_in_flight: false,
                started_at: None,
                completed_at: None,
                last_result: Value::Null,
                error: None,
            }),
        }
    }

    pub(crate) fn step_names(&self) -> Vec<String> {
        self.steps.iter().map(|step| step.name.clone()).collect()
    }

    /// Halved sum of step timeouts, used as a midpoint progress estimate.
    pub(crate) fn estimated_duration_ms(&self) -> u64 {
        let total = self
            .steps
            .iter()
            .map(|step| step.timeout)
            .fold(Duration::ZERO, Duration::saturating_add);
        u64::try_from(total.as_millis() / 2).unwrap_or(u64::MAX)
    }

    pub(crate) async fn state(&self) -> TaskState {
        self.progress.lock().await.state
    }

    pub(crate) async fn snapshot(&self) -> TaskResult {
        let progress = self.progress.lock().await;
        let duration_ms = match progress.started_at {
            Some(started_at) => {
                let finished_at = progress.completed_at.unwrap_or_else(SystemTime::now);
                let elapsed = finished_at.duration_since(started_at).unwrap_or_default();
                u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
            }
            None => 0,
        };

        TaskResult {
            task_id: self.id.clone(),
            name: self.name.clone(),
            state: progress.state,
            result: progress.last_result.clone(),
            error: progress.error.clone(),
            duration_ms,
            steps_completed: progress.steps_completed,
            total_steps: self.steps.len(),
        }
    }

    /// PENDING -> RUNNING. False when the record already reached a terminal state.
    pub(crate) async fn mark_running(&self) -> bool {
        let mut progress = self.progress.lock().await;
        if progress.state != TaskState::Pending {
            return false;
        }
        progress.state = TaskState::Running;
        progress.started_at = Some(SystemTime::now());
        true
    }

    pub(crate) async fn begin_step(&self, index: usize) {
        let mut progress = self.progress.lock().await;
        progress.current_step_index = progress.current_step_index.max(index);
        progress.step_in_flight = true;
    }

    pub(crate) async fn complete_step(&self, index: usize, output: Value) {
        let mut progress = self.progress.lock().await;
        progress.current_step_index = progress.current_step_index.max(index);
        progress.steps_completed = index + 1;
        progress.step_in_flight = false;
        progress.last_result = output;
    }

    pub(crate) async fn in_flight_step(&self) -> Option<usize> {
        let progress = self.progress.lock().await;
        progress
            .step_in_flight
            .then_some(progress.current_step_index)
    }

    /// Applies a terminal transition unless one already happened. The first caller wins.
    pub(crate) async fn finish(&self, state: TaskState, error: Option<String>) -> bool {
        debug_assert!(state.is_terminal());
        let mut progress = self.progress.lock().await;
        if progress.state.is_terminal() {
            return false;
        }
        progress.state = state;
        progress.step_in_flight = false;
        progress.completed_at = Some(SystemTime::now());
        progress.error = error;
        true
    }

    /// PENDING -> CANCELLED, for tasks still waiting on the gate.
    pub(crate) async fn cancel_if_pending(&self) -> bool {
        let mut progress = self.progress.lock().await;
        if progress.state != TaskState::Pending {
            return false;
        }
        progress.state = TaskState::Cancelled;
        progress.completed_at = Some(SystemTime::now());
        true
    }

    /// Cooperative cancellation request. False when terminal or already requested.
    pub(crate) async fn request_cancel(&self) -> bool {
        if self.state().await.is_terminal() {
            return false;
        }
        self.cancel_requested.request()
    }

    pub(crate) fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.is_cancelled()
    }

    /// Terminal and completed at least `max_age` before `now`.
    pub(crate) async fn is_expired(&self, now: SystemTime, max_age: Duration) -> bool {
        let progress = self.progress.lock().await;
        if !progress.state.is_terminal() {
            return false;
        }
        progress.completed_at.is_some_and(|completed_at| {
            now.duration_since(completed_at).unwrap_or_default() >= max_age
        })
    }

    pub(crate) async fn set_run_handle(&self, handle: AbortHandle) {
        *self.run_handle.lock().await = Some(handle);
    }

    /// Hard-stops the background unit, if it is still attached.
    pub(crate) async fn abort_run(&self) {
        if let Some(handle) = self.run_handle.lock().await.take() {
            handle.abort();
        }
    }

    pub(crate) async fn detach_run(&self) {
        self.run_handle.lock().await.take();
    }

    pub(crate) fn wake_waiters(&self) {
        self.completion.notify_waiters();
    }

    /// Waits for a terminal state, or returns the current snapshot once `timeout` elapses.
    pub(crate) async fn wait_terminal(&self, timeout: Option<Duration>) -> TaskResult {
        let deadline = timeout.and_then(|timeout| Instant::now().checked_add(timeout));
        loop {
            let notified = self.completion.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let snapshot = self.snapshot().await;
            if snapshot.state.is_terminal() {
                return snapshot;
            }

            match deadline {
                Some(deadline) => {
                    if timeout_at(deadline, notified).await.is_err() {
                        return self.snapshot().await;
                    }
                }
                None => notified.await,
            }
        }
    }
}

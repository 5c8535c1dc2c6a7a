use std::collections::HashMap;
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, SystemTime};

use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::EngineConfig;
use crate::models::{
    CoreError, CoreErrorKind, StepDefinition, StepStatus, TaskContext, TaskId, TaskResult,
    TaskState,
};
use crate::orchestration::progress::ProgressNotifier;
use crate::orchestration::record::TaskRecord;
use crate::orchestration::supervisor::{TaskSupervisor, announce_terminal};
use crate::orchestration::{
    CancellationMode, ConcurrencyGate, GateStats, NoopProgressObserver, OrchestrationResult,
    ProgressObserver, TaskSubmission,
};

/// Entry point for submitting, observing and cancelling tasks.
///
/// Clones share the same registry and gate. Submitting requires a running tokio runtime,
/// since every task is supervised on its own spawned tokio task.
#[derive(Clone)]
pub struct TaskManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    config: EngineConfig,
    gate: ConcurrencyGate,
    notifier: ProgressNotifier,
    registry: Mutex<Registry>,
}

#[derive(Default)]
struct Registry {
    tasks: HashMap<TaskId, Arc<TaskRecord>>,
    shutting_down: bool,
    cleanup_sweep: Option<AbortHandle>,
}

static DEFAULT_MANAGER: OnceLock<TaskManager> = OnceLock::new();

/// Process-wide instance configured from the environment, for callers that cannot have a
/// manager injected.
pub fn default_manager() -> &'static TaskManager {
    DEFAULT_MANAGER.get_or_init(|| {
        let config = EngineConfig::from_env().unwrap_or_else(|error| {
            tracing::warn!(
                message = %error.message,
                "invalid engine configuration in environment, using defaults"
            );
            EngineConfig::default()
        });
        let gate = ConcurrencyGate::new(config.max_concurrent_tasks).unwrap_or_default();
        TaskManager::from_parts(config, gate, Arc::new(NoopProgressObserver))
    })
}

impl TaskManager {
    pub fn new(
        config: EngineConfig,
        observer: Arc<dyn ProgressObserver>,
    ) -> OrchestrationResult<Self> {
        config.validate()?;
        let gate = ConcurrencyGate::new(config.max_concurrent_tasks)?;
        Ok(Self::from_parts(config, gate, observer))
    }

    pub fn with_config(config: EngineConfig) -> OrchestrationResult<Self> {
        Self::new(config, Arc::new(NoopProgressObserver))
    }

    fn from_parts(
        config: EngineConfig,
        gate: ConcurrencyGate,
        observer: Arc<dyn ProgressObserver>,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                config,
                gate,
                notifier: ProgressNotifier::new(observer),
                registry: Mutex::new(Registry::default()),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn gate_stats(&self) -> GateStats {
        self.inner.gate.stats()
    }

    pub async fn submit(
        &self,
        name: impl Into<String>,
        steps: Vec<StepDefinition>,
        context: TaskContext,
        overall_timeout: Option<Duration>,
    ) -> OrchestrationResult<TaskId> {
        let mut submission = TaskSubmission::new(name, steps).context(context);
        submission.overall_timeout = overall_timeout;
        self.submit_task(submission).await
    }

    pub async fn submit_task(&self, submission: TaskSubmission) -> OrchestrationResult<TaskId> {
        submission.validate()?;

        let record = {
            let mut registry = self.inner.registry.lock().await;
            if registry.shutting_down {
                return Err(CoreError::new(
                    CoreErrorKind::ShuttingDown,
                    format!(
                        "task manager is shutting down; rejected task '{}'",
                        submission.name
                    ),
                ));
            }

            let task_id = TaskId::generate();
            let record = Arc::new(TaskRecord::new(task_id.clone(), submission));
            registry.tasks.insert(task_id, record.clone());
            record
        };

        tracing::info!(
            task_id = %record.id,
            name = %record.name,
            steps = record.steps.len(),
            "task submitted"
        );

        let supervisor = TaskSupervisor::new(
            record.clone(),
            self.inner.gate.clone(),
            self.inner.notifier.clone(),
        );
        let join_handle = tokio::spawn(supervisor.run());
        record.set_run_handle(join_handle.abort_handle()).await;

        Ok(record.id.clone())
    }

    pub async fn status(&self, task_id: &TaskId) -> Option<TaskResult> {
        let record = self.lookup(task_id).await?;
        Some(record.snapshot().await)
    }

    /// Snapshots of every registered task, newest first.
    pub async fn list(&self) -> Vec<TaskResult> {
        let mut records: Vec<Arc<TaskRecord>> = {
            let registry = self.inner.registry.lock().await;
            registry.tasks.values().cloned().collect()
        };
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let mut snapshots = Vec::with_capacity(records.len());
        for record in records {
            snapshots.push(record.snapshot().await);
        }
        snapshots
    }

    /// Requests cancellation, interrupting the task if it has not stopped within
    /// `EngineConfig::cancel_grace_period`.
    ///
    /// The grace period is fixed and does not shrink to the in-flight step's remaining
    /// timeout. A step attempt never outlives its own timeout, so a running task stops by
    /// the end of its current attempt at the latest; set a shorter grace period, or use
    /// [`CancellationMode::Immediate`], to stop sooner. False when the task is unknown,
    /// already terminal or already being cancelled.
    pub async fn cancel(&self, task_id: &TaskId) -> bool {
        let grace_period = self.inner.config.cancel_grace_period;
        self.cancel_with(task_id, CancellationMode::Graceful { grace_period })
            .await
    }

    pub async fn cancel_with(&self, task_id: &TaskId, mode: CancellationMode) -> bool {
        let Some(record) = self.lookup(task_id).await else {
            return false;
        };

        if !self.request_cancel(&record).await {
            return false;
        }

        match mode {
            CancellationMode::Immediate => {
                self.interrupt(&record).await;
            }
            CancellationMode::Graceful { grace_period } => {
                let manager = self.clone();
                tokio::spawn(async move {
                    let snapshot = record.wait_terminal(Some(grace_period)).await;
                    if !snapshot.state.is_terminal() {
                        manager.interrupt(&record).await;
                    }
                });
            }
        }

        true
    }

    pub async fn wait_for(
        &self,
        task_id: &TaskId,
        timeout: Option<Duration>,
    ) -> OrchestrationResult<TaskResult> {
        let record = self
            .lookup(task_id)
            .await
            .ok_or_else(|| task_lookup_error(task_id))?;
        Ok(record.wait_terminal(timeout).await)
    }

    /// Drops terminal tasks that completed at least `max_age` ago. Returns how many went.
    pub async fn cleanup_completed(&self, max_age: Duration) -> usize {
        let now = SystemTime::now();
        let mut registry = self.inner.registry.lock().await;

        let mut expired = Vec::new();
        for (task_id, record) in &registry.tasks {
            if record.is_expired(now, max_age).await {
                expired.push(task_id.clone());
            }
        }

        for task_id in &expired {
            registry.tasks.remove(task_id);
        }

        if !expired.is_empty() {
            tracing::debug!(
                removed = expired.len(),
                remaining = registry.tasks.len(),
                "cleaned up completed tasks"
            );
        }
        expired.len()
    }

    /// Runs `cleanup_completed(max_age)` every `interval` until shutdown. Replaces any
    /// sweep started earlier.
    pub async fn spawn_periodic_cleanup(
        &self,
        interval: Duration,
        max_age: Duration,
    ) -> OrchestrationResult<()> {
        if interval.is_zero() {
            return Err(CoreError::invalid_input(
                "cleanup interval must be greater than zero",
            ));
        }

        let weak: Weak<ManagerInner> = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                TaskManager { inner }.cleanup_completed(max_age).await;
            }
        });

        let mut registry = self.inner.registry.lock().await;
        if let Some(previous) = registry.cleanup_sweep.replace(handle.abort_handle()) {
            previous.abort();
        }
        Ok(())
    }

    /// Stops accepting work, requests cancellation of everything still in flight and waits
    /// up to the shutdown grace period before interrupting stragglers.
    pub async fn shutdown(&self) {
        let records: Vec<Arc<TaskRecord>> = {
            let mut registry = self.inner.registry.lock().await;
            registry.shutting_down = true;
            if let Some(sweep) = registry.cleanup_sweep.take() {
                sweep.abort();
            }
            registry.tasks.values().cloned().collect()
        };

        let mut active = Vec::new();
        for record in records {
            if !record.state().await.is_terminal() {
                self.request_cancel(&record).await;
                active.push(record);
            }
        }

        tracing::info!(active = active.len(), "shutting down task manager");

        let grace_period = self.inner.config.shutdown_grace_period;
        let deadline = Instant::now().checked_add(grace_period);
        for record in active {
            let remaining =
                deadline.map(|deadline| deadline.saturating_duration_since(Instant::now()));
            let snapshot = record.wait_terminal(remaining).await;
            if !snapshot.state.is_terminal() {
                self.interrupt(&record).await;
            }
        }
    }

    async fn lookup(&self, task_id: &TaskId) -> Option<Arc<TaskRecord>> {
        let registry = self.inner.registry.lock().await;
        registry.tasks.get(task_id).cloned()
    }

    /// Cooperative path: raise the flag checked between steps. A task still waiting on
    /// the gate never runs a step, so it is cancelled on the spot.
    async fn request_cancel(&self, record: &Arc<TaskRecord>) -> bool {
        if !record.request_cancel().await {
            return false;
        }

        tracing::info!(task_id = %record.id, "cancellation requested");

        if record.cancel_if_pending().await {
            record.abort_run().await;
            announce_terminal(record, &self.inner.notifier, TaskState::Cancelled, None);
        }
        true
    }

    /// Forced path: hard-stop the task's execution unit and publish CANCELLED.
    async fn interrupt(&self, record: &Arc<TaskRecord>) {
        record.abort_run().await;
        let in_flight = record.in_flight_step().await;
        let error = format!("task '{}' was interrupted", record.name);
        if !record.finish(TaskState::Cancelled, Some(error.clone())).await {
            return;
        }

        tracing::warn!(task_id = %record.id, "task interrupted after cancellation");
        if let Some(index) = in_flight {
            self.inner
                .notifier
                .step_update(&record.id, index, StepStatus::Failed);
        }
        announce_terminal(record, &self.inner.notifier, TaskState::Cancelled, Some(&error));
    }
}

fn task_lookup_error(task_id: &TaskId) -> CoreError {
    CoreError::invalid_input(format!("unknown task id '{task_id}'")).for_task(task_id)
}

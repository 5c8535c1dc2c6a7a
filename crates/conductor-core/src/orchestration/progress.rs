use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use crate::models::{BoxError, StepStatus, TaskId, TaskState};

pub type ObserverResult = Result<(), BoxError>;

/// Sink for task lifecycle events. Every callback defaults to a no-op.
///
/// Callbacks run inline on the task's execution unit, so implementations should hand
/// work off (for example to a channel) rather than block. Errors and panics raised here
/// are logged by the engine and never change a task's outcome.
pub trait ProgressObserver: Send + Sync {
    fn on_task_start(
        &self,
        _task_id: &TaskId,
        _name: &str,
        _step_names: &[String],
        _estimated_duration_ms: u64,
    ) -> ObserverResult {
        Ok(())
    }

    fn on_step_update(
        &self,
        _task_id: &TaskId,
        _step_index: usize,
        _status: StepStatus,
    ) -> ObserverResult {
        Ok(())
    }

    fn on_task_terminal(
        &self,
        _task_id: &TaskId,
        _final_state: TaskState,
        _error: Option<&str>,
    ) -> ObserverResult {
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopProgressObserver;

impl ProgressObserver for NoopProgressObserver {}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    TaskStart {
        task_id: TaskId,
        name: String,
        step_names: Vec<String>,
        estimated_duration_ms: u64,
    },
    StepUpdate {
        task_id: TaskId,
        step_index: usize,
        #[serde(flatten)]
        status: StepStatus,
    },
    TaskTerminal {
        task_id: TaskId,
        state: TaskState,
        error: Option<String>,
    },
}

impl ProgressEvent {
    pub fn task_id(&self) -> &TaskId {
        match self {
            ProgressEvent::TaskStart { task_id, .. }
            | ProgressEvent::StepUpdate { task_id, .. }
            | ProgressEvent::TaskTerminal { task_id, .. } => task_id,
        }
    }
}

/// Forwards every callback as a [`ProgressEvent`] for a transport to drain.
#[derive(Clone, Debug)]
pub struct ChannelProgressObserver {
    sender: UnboundedSender<ProgressEvent>,
}

impl ChannelProgressObserver {
    pub fn new() -> (Self, UnboundedReceiver<ProgressEvent>) {
        let (sender, receiver) = unbounded_channel();
        (Self { sender }, receiver)
    }

    fn send(&self, event: ProgressEvent) -> ObserverResult {
        self.sender
            .send(event)
            .map_err(|_| "progress event receiver dropped".into())
    }
}

impl ProgressObserver for ChannelProgressObserver {
    fn on_task_start(
        &self,
        task_id: &TaskId,
        name: &str,
        step_names: &[String],
        estimated_duration_ms: u64,
    ) -> ObserverResult {
        self.send(ProgressEvent::TaskStart {
            task_id: task_id.clone(),
            name: name.to_string(),
            step_names: step_names.to_vec(),
            estimated_duration_ms,
        })
    }

    fn on_step_update(
        &self,
        task_id: &TaskId,
        step_index: usize,
        status: StepStatus,
    ) -> ObserverResult {
        self.send(ProgressEvent::StepUpdate {
            task_id: task_id.clone(),
            step_index,
            status,
        })
    }

    fn on_task_terminal(
        &self,
        task_id: &TaskId,
        final_state: TaskState,
        error: Option<&str>,
    ) -> ObserverResult {
        self.send(ProgressEvent::TaskTerminal {
            task_id: task_id.clone(),
            state: final_state,
            error: error.map(str::to_string),
        })
    }
}

/// Observer call site that swallows and logs failures.
#[derive(Clone)]
pub(crate) struct ProgressNotifier {
    observer: Arc<dyn ProgressObserver>,
}

impl ProgressNotifier {
    pub(crate) fn new(observer: Arc<dyn ProgressObserver>) -> Self {
        Self { observer }
    }

    pub(crate) fn task_start(
        &self,
        task_id: &TaskId,
        name: &str,
        step_names: &[String],
        estimated_duration_ms: u64,
    ) {
        self.guarded(task_id, "on_task_start", |observer| {
            observer.on_task_start(task_id, name, step_names, estimated_duration_ms)
        });
    }

    pub(crate) fn step_update(&self, task_id: &TaskId, step_index: usize, status: StepStatus) {
        self.guarded(task_id, "on_step_update", |observer| {
            observer.on_step_update(task_id, step_index, status)
        });
    }

    pub(crate) fn task_terminal(&self, task_id: &TaskId, state: TaskState, error: Option<&str>) {
        self.guarded(task_id, "on_task_terminal", |observer| {
            observer.on_task_terminal(task_id, state, error)
        });
    }

    fn guarded(
        &self,
        task_id: &TaskId,
        callback: &'static str,
        call: impl FnOnce(&dyn ProgressObserver) -> ObserverResult,
    ) {
        match catch_unwind(AssertUnwindSafe(|| call(self.observer.as_ref()))) {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                tracing::warn!(
                    task_id = %task_id,
                    callback,
                    error = %error,
                    "progress observer callback failed"
                );
            }
            Err(_) => {
                tracing::warn!(
                    task_id = %task_id,
                    callback,
                    "progress observer callback panicked"
                );
            }
        }
    }
}

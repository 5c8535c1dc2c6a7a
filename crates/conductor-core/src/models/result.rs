use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{TaskId, TaskState};

/// Point-in-time view of a task, the only shape callers ever observe.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub name: String,
    pub state: TaskState,
    pub result: Value,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub steps_completed: usize,
    pub total_steps: usize,
}

impl TaskResult {
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use conductor_core::{BoxError, StepDefinition, TaskContext, TaskSubmission};
use serde::Deserialize;
use serde_json::Value;

use crate::error::CliError;

/// A task described as JSON, with a small set of built-in step actions.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Pipeline {
    pub name: String,
    #[serde(default)]
    pub context: TaskContext,
    #[serde(default)]
    pub overall_timeout_secs: Option<u64>,
    pub steps: Vec<PipelineStep>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineStep {
    pub name: String,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub retries: u32,
    #[serde(default)]
    pub retry_delay_ms: u64,
    pub action: StepAction,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum StepAction {
    /// Returns `value`.
    Echo { value: Value },
    /// Sleeps, then passes the previous output through.
    Sleep { millis: u64 },
    /// Fails with `message`; with `succeed_after`, only that many attempts fail.
    Fail {
        message: String,
        #[serde(default)]
        succeed_after: Option<u32>,
    },
    /// Returns the context entry under `key`, or null.
    Context { key: String },
}

impl Pipeline {
    pub fn load(path: &Path) -> Result<Self, CliError> {
        let raw = std::fs::read_to_string(path).map_err(|source| CliError::ReadPipeline {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&raw).map_err(|source| CliError::ParsePipeline {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn into_submission(self) -> TaskSubmission {
        let steps = self.steps.into_iter().map(PipelineStep::into_definition).collect();
        let submission = TaskSubmission::new(self.name, steps).context(self.context);
        match self.overall_timeout_secs {
            Some(secs) => submission.overall_timeout(Duration::from_secs(secs)),
            None => submission,
        }
    }
}

impl PipelineStep {
    fn into_definition(self) -> StepDefinition {
        let definition = match self.action {
            StepAction::Echo { value } => StepDefinition::new(self.name, move |_, _| {
                let value = value.clone();
                async move { Ok::<_, BoxError>(value) }
            }),
            StepAction::Sleep { millis } => {
                StepDefinition::new(self.name, move |previous, _| async move {
                    tokio::time::sleep(Duration::from_millis(millis)).await;
                    Ok::<_, BoxError>(previous)
                })
            }
            StepAction::Fail {
                message,
                succeed_after,
            } => {
                let failures = Arc::new(AtomicU32::new(0));
                StepDefinition::new(self.name, move |previous, _| {
                    let failed_so_far = failures.fetch_add(1, Ordering::SeqCst);
                    let recovered = succeed_after.is_some_and(|limit| failed_so_far >= limit);
                    let message = message.clone();
                    async move {
                        if recovered {
                            Ok(previous)
                        } else {
                            Err::<Value, BoxError>(message.into())
                        }
                    }
                })
            }
            StepAction::Context { key } => StepDefinition::new(self.name, move |_, context| {
                let value = context.get(&key).cloned().unwrap_or(Value::Null);
                async move { Ok::<_, BoxError>(value) }
            }),
        };

        let definition = definition
            .retries(self.retries)
            .retry_delay(Duration::from_millis(self.retry_delay_ms));
        match self.timeout_secs {
            Some(secs) => definition.timeout(Duration::from_secs(secs)),
            None => definition,
        }
    }
}

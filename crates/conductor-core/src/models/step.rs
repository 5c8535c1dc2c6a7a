use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};

use crate::models::BoxError;

pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(60);

/// Opaque key/value context supplied at submission and handed to every step.
pub type TaskContext = Map<String, Value>;

pub type StepFuture = Pin<Box<dyn Future<Output = Result<Value, BoxError>> + Send>>;

pub type StepHandler = Arc<dyn Fn(Value, Arc<TaskContext>) -> StepFuture + Send + Sync>;

/// One unit of sequential work. Cloning shares the handler.
#[derive(Clone)]
pub struct StepDefinition {
    pub name: String,
    pub handler: StepHandler,
    pub timeout: Duration,
    pub retries: u32,
    pub retry_delay: Duration,
}

impl StepDefinition {
    pub fn new<F, Fut>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Value, Arc<TaskContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
    {
        let handler: StepHandler =
            Arc::new(move |previous: Value, context: Arc<TaskContext>| -> StepFuture {
                Box::pin(handler(previous, context))
            });
        Self {
            name: name.into(),
            handler,
            timeout: DEFAULT_STEP_TIMEOUT,
            retries: 0,
            retry_delay: Duration::ZERO,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    pub(crate) fn invoke(&self, previous: Value, context: Arc<TaskContext>) -> StepFuture {
        (self.handler)(previous, context)
    }
}

impl Debug for StepDefinition {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepDefinition")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .field("retries", &self.retries)
            .field("retry_delay", &self.retry_delay)
            .finish_non_exhaustive()
    }
}

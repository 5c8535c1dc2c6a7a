use std::time::Duration;

use serde::Deserialize;
use tokio::sync::Semaphore;

use crate::models::CoreError;

pub const DEFAULT_MAX_CONCURRENT_TASKS: usize = 5;
pub const DEFAULT_CANCEL_GRACE_PERIOD: Duration = Duration::from_secs(5);
pub const DEFAULT_SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(10);

pub const ENV_MAX_CONCURRENT_TASKS: &str = "CONDUCTOR_MAX_CONCURRENT_TASKS";
pub const ENV_CANCEL_GRACE_MS: &str = "CONDUCTOR_CANCEL_GRACE_MS";
pub const ENV_SHUTDOWN_GRACE_MS: &str = "CONDUCTOR_SHUTDOWN_GRACE_MS";

#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub max_concurrent_tasks: usize,
    #[serde(rename = "cancel_grace_ms", with = "millis")]
    pub cancel_grace_period: Duration,
    #[serde(rename = "shutdown_grace_ms", with = "millis")]
    pub shutdown_grace_period: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: DEFAULT_MAX_CONCURRENT_TASKS,
            cancel_grace_period: DEFAULT_CANCEL_GRACE_PERIOD,
            shutdown_grace_period: DEFAULT_SHUTDOWN_GRACE_PERIOD,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, CoreError> {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides looked up by environment variable name on top of `self`.
    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, CoreError> {
        if let Some(raw) = lookup(ENV_MAX_CONCURRENT_TASKS) {
            let value = parse_number(ENV_MAX_CONCURRENT_TASKS, &raw)?;
            self.max_concurrent_tasks = usize::try_from(value).unwrap_or(usize::MAX);
        }
        if let Some(raw) = lookup(ENV_CANCEL_GRACE_MS) {
            self.cancel_grace_period =
                Duration::from_millis(parse_number(ENV_CANCEL_GRACE_MS, &raw)?);
        }
        if let Some(raw) = lookup(ENV_SHUTDOWN_GRACE_MS) {
            self.shutdown_grace_period =
                Duration::from_millis(parse_number(ENV_SHUTDOWN_GRACE_MS, &raw)?);
        }
        self.validate()?;
        Ok(self)
    }

    pub fn max_concurrent_tasks(mut self, max_concurrent_tasks: usize) -> Self {
        self.max_concurrent_tasks = max_concurrent_tasks;
        self
    }

    pub fn cancel_grace_period(mut self, grace_period: Duration) -> Self {
        self.cancel_grace_period = grace_period;
        self
    }

    pub fn shutdown_grace_period(mut self, grace_period: Duration) -> Self {
        self.shutdown_grace_period = grace_period;
        self
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.max_concurrent_tasks == 0 {
            return Err(CoreError::invalid_input(
                "max_concurrent_tasks must be greater than zero",
            ));
        }
        if self.max_concurrent_tasks > Semaphore::MAX_PERMITS {
            return Err(CoreError::invalid_input(format!(
                "max_concurrent_tasks must not exceed {}",
                Semaphore::MAX_PERMITS
            )));
        }
        Ok(())
    }
}

fn parse_number(key: &str, raw: &str) -> Result<u64, CoreError> {
    raw.trim().parse::<u64>().map_err(|error| {
        CoreError::invalid_input(format!("{key} must be a non-negative integer: {error}"))
    })
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

//! Background orchestration of named, multi-step tasks.
//!
//! A [`orchestration::TaskManager`] accepts a task made of ordered
//! [`models::StepDefinition`]s, runs the steps one after another on a tokio task, applies
//! per-step and whole-task timeouts, retries failing steps within their budget, bounds how
//! many tasks run at once and reports progress to a [`orchestration::ProgressObserver`].

pub mod config;
pub mod models;
pub mod orchestration;

pub use config::EngineConfig;
pub use models::{
    BoxError, CoreError, CoreErrorKind, StepDefinition, StepStatus, TaskContext, TaskId,
    TaskResult, TaskState,
};
pub use orchestration::{
    CancellationMode, ChannelProgressObserver, NoopProgressObserver, ProgressEvent,
    ProgressObserver, TaskManager, TaskSubmission, default_manager,
};

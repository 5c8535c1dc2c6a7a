pub mod error;
pub mod result;
pub mod step;
pub mod task;

pub use error::{BoxError, CoreError, CoreErrorKind};
pub use result::TaskResult;
pub use step::{DEFAULT_STEP_TIMEOUT, StepDefinition, StepFuture, StepHandler, TaskContext};
pub use task::{StepStatus, TaskId, TaskState};

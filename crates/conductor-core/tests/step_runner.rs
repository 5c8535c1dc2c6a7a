use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use conductor_core::orchestration::{StepRunner, TaskCancellationToken};
use conductor_core::{
    BoxError, ChannelProgressObserver, CoreErrorKind, ProgressEvent, StepDefinition, StepStatus,
    TaskContext, TaskId,
};
use serde_json::{Value, json};

fn failing_step(attempts: Arc<AtomicU32>) -> StepDefinition {
    StepDefinition::new("sync", move |_, _| {
        attempts.fetch_add(1, Ordering::SeqCst);
        async { Err::<Value, BoxError>("connection reset".into()) }
    })
}

#[tokio::test]
async fn runner_passes_previous_output_to_handler() {
    let runner = StepRunner::new(TaskId::from("t-1"), TaskCancellationToken::new());
    let step = StepDefinition::new("double", |previous: Value, _| async move {
        Ok::<_, BoxError>(json!(previous.as_i64().unwrap_or(0) * 2))
    });

    let output = runner
        .run(0, &step, json!(21), Arc::new(TaskContext::new()))
        .await
        .unwrap();
    assert_eq!(output, json!(42));
}

#[tokio::test]
async fn exhausted_retries_report_step_failure() {
    let attempts = Arc::new(AtomicU32::new(0));
    let (observer, mut receiver) = ChannelProgressObserver::new();
    let runner = StepRunner::new(TaskId::from("t-2"), TaskCancellationToken::new())
        .with_observer(Arc::new(observer));
    let step = failing_step(attempts.clone()).retries(2);

    let error = runner
        .run(3, &step, Value::Null, Arc::new(TaskContext::new()))
        .await
        .unwrap_err();

    assert_eq!(error.kind, CoreErrorKind::StepFailure);
    assert_eq!(error.step.as_deref(), Some("sync"));
    assert_eq!(error.task, Some(TaskId::from("t-2")));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);

    let mut retries = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        if let ProgressEvent::StepUpdate {
            step_index, status, ..
        } = event
        {
            retries.push((step_index, status));
        }
    }
    assert_eq!(
        retries,
        vec![
            (3, StepStatus::Retrying { attempt: 2 }),
            (3, StepStatus::Retrying { attempt: 3 }),
        ]
    );
}

#[tokio::test]
async fn cancelled_token_stops_further_attempts() {
    let attempts = Arc::new(AtomicU32::new(0));
    let token = TaskCancellationToken::new();
    token.cancel();
    let runner = StepRunner::new(TaskId::from("t-3"), token);
    let step = failing_step(attempts.clone()).retries(5);

    let error = runner
        .run(0, &step, Value::Null, Arc::new(TaskContext::new()))
        .await
        .unwrap_err();

    assert_eq!(error.kind, CoreErrorKind::Cancelled);
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn attempt_that_overruns_its_timeout_reports_timeout() {
    let runner = StepRunner::new(TaskId::from("t-4"), TaskCancellationToken::new());
    let step = StepDefinition::new("hang", |_, _| std::future::pending::<Result<Value, BoxError>>())
        .timeout(Duration::from_millis(20));

    let error = runner
        .run(0, &step, Value::Null, Arc::new(TaskContext::new()))
        .await
        .unwrap_err();

    assert_eq!(error.kind, CoreErrorKind::Timeout);
    assert!(error.message.contains("1 attempt(s)"), "{}", error.message);
}

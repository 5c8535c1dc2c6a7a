use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use conductor_core::{
    BoxError, CancellationMode, CoreErrorKind, EngineConfig, StepDefinition, TaskContext, TaskId,
    TaskManager, TaskState, TaskSubmission, default_manager,
};
use serde_json::{Value, json};

fn manager(config: EngineConfig) -> TaskManager {
    TaskManager::with_config(config).unwrap()
}

fn echo_step(name: &str, output: Value) -> StepDefinition {
    StepDefinition::new(name, move |_, _| {
        let output = output.clone();
        async move { Ok::<_, BoxError>(output) }
    })
}

fn sleeping_step(name: &str, millis: u64) -> StepDefinition {
    StepDefinition::new(name, move |_, _| async move {
        tokio::time::sleep(Duration::from_millis(millis)).await;
        Ok::<_, BoxError>(json!(millis))
    })
}

fn blocking_step(name: &str) -> StepDefinition {
    StepDefinition::new(name, |_, _| std::future::pending::<Result<Value, BoxError>>())
        .timeout(Duration::from_secs(30))
}

fn counting_step(name: &str, seen: Arc<Mutex<Vec<Value>>>) -> StepDefinition {
    StepDefinition::new(name, move |previous: Value, _| {
        seen.lock().unwrap().push(previous.clone());
        async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok::<_, BoxError>(json!(previous.as_i64().unwrap_or(0) + 1))
        }
    })
}

#[tokio::test]
async fn steps_receive_previous_output_in_order() {
    let manager = manager(EngineConfig::default());
    let seen = Arc::new(Mutex::new(Vec::new()));

    let task_id = manager
        .submit(
            "export",
            vec![
                counting_step("fetch", seen.clone()),
                counting_step("transform", seen.clone()),
                counting_step("publish", seen.clone()),
            ],
            TaskContext::new(),
            None,
        )
        .await
        .unwrap();

    let result = manager
        .wait_for(&task_id, Some(Duration::from_secs(2)))
        .await
        .unwrap();

    assert_eq!(result.state, TaskState::Completed);
    assert_eq!(result.result, json!(3));
    assert_eq!(result.error, None);
    assert_eq!(result.steps_completed, 3);
    assert_eq!(result.total_steps, 3);
    assert_eq!(*seen.lock().unwrap(), vec![Value::Null, json!(1), json!(2)]);
}

#[tokio::test]
async fn submission_context_is_visible_to_every_step() {
    let manager = manager(EngineConfig::default());
    let mut context = TaskContext::new();
    context.insert("tenant".to_string(), json!("acme"));

    let step = StepDefinition::new("lookup", |_, context| async move {
        Ok::<_, BoxError>(context.get("tenant").cloned().unwrap_or(Value::Null))
    });

    let task_id = manager
        .submit_task(TaskSubmission::new("report", vec![step]).context(context))
        .await
        .unwrap();
    let result = manager
        .wait_for(&task_id, Some(Duration::from_secs(1)))
        .await
        .unwrap();

    assert_eq!(result.state, TaskState::Completed);
    assert_eq!(result.result, json!("acme"));
}

#[tokio::test]
async fn submit_rejects_invalid_input() {
    let manager = manager(EngineConfig::default());

    let error = manager
        .submit("empty", Vec::new(), TaskContext::new(), None)
        .await
        .unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::InvalidInput);

    let error = manager
        .submit(
            "zero-timeout",
            vec![echo_step("fetch", json!(1)).timeout(Duration::ZERO)],
            TaskContext::new(),
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::InvalidInput);
    assert!(manager.list().await.is_empty());
}

#[tokio::test]
async fn unknown_task_ids_are_reported() {
    let manager = manager(EngineConfig::default());
    let missing = TaskId::from("missing");

    assert!(manager.status(&missing).await.is_none());

    let error = manager.wait_for(&missing, None).await.unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::InvalidInput);
    assert_eq!(error.task, Some(missing));
}

#[tokio::test]
async fn abandoned_wait_does_not_cancel_task() {
    let manager = manager(EngineConfig::default());
    let task_id = manager
        .submit(
            "slow",
            vec![sleeping_step("work", 150)],
            TaskContext::new(),
            None,
        )
        .await
        .unwrap();

    let early = manager
        .wait_for(&task_id, Some(Duration::from_millis(20)))
        .await
        .unwrap();
    assert!(!early.is_terminal());

    let finished = manager
        .wait_for(&task_id, Some(Duration::from_secs(2)))
        .await
        .unwrap();
    assert_eq!(finished.state, TaskState::Completed);
    assert_eq!(finished.result, json!(150));
}

#[tokio::test]
async fn duration_is_computed_at_read_time() {
    let manager = manager(EngineConfig::default());
    let task_id = manager
        .submit(
            "slow",
            vec![sleeping_step("work", 120)],
            TaskContext::new(),
            None,
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    let first = manager.status(&task_id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(40)).await;
    let second = manager.status(&task_id).await.unwrap();
    assert_eq!(second.state, TaskState::Running);
    assert!(second.duration_ms > first.duration_ms);

    let finished = manager
        .wait_for(&task_id, Some(Duration::from_secs(2)))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    let later = manager.status(&task_id).await.unwrap();
    assert!(finished.duration_ms >= 100);
    assert_eq!(later.duration_ms, finished.duration_ms);
}

#[tokio::test]
async fn cleanup_removes_only_terminal_tasks() {
    let manager = manager(EngineConfig::default().max_concurrent_tasks(1));

    let done = manager
        .submit("done", vec![echo_step("noop", json!(1))], TaskContext::new(), None)
        .await
        .unwrap();
    manager
        .wait_for(&done, Some(Duration::from_secs(1)))
        .await
        .unwrap();

    let running = manager
        .submit("running", vec![blocking_step("hang")], TaskContext::new(), None)
        .await
        .unwrap();
    let pending = manager
        .submit("pending", vec![blocking_step("hang")], TaskContext::new(), None)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert_eq!(manager.cleanup_completed(Duration::from_secs(3600)).await, 0);
    assert_eq!(manager.cleanup_completed(Duration::ZERO).await, 1);

    assert!(manager.status(&done).await.is_none());
    assert_eq!(
        manager.status(&running).await.unwrap().state,
        TaskState::Running
    );
    assert_eq!(
        manager.status(&pending).await.unwrap().state,
        TaskState::Pending
    );

    assert!(
        manager
            .cancel_with(&running, CancellationMode::Immediate)
            .await
    );
    assert!(
        manager
            .cancel_with(&pending, CancellationMode::Immediate)
            .await
    );
    assert_eq!(manager.cleanup_completed(Duration::ZERO).await, 2);
    assert!(manager.list().await.is_empty());
}

#[tokio::test]
async fn periodic_cleanup_sweeps_finished_tasks() {
    let manager = manager(EngineConfig::default());
    manager
        .spawn_periodic_cleanup(Duration::from_millis(20), Duration::ZERO)
        .await
        .unwrap();

    let task_id = manager
        .submit("quick", vec![echo_step("noop", json!(true))], TaskContext::new(), None)
        .await
        .unwrap();
    manager
        .wait_for(&task_id, Some(Duration::from_secs(1)))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(manager.status(&task_id).await.is_none());
}

#[tokio::test]
async fn zero_cleanup_interval_is_rejected_and_keeps_existing_sweep() {
    let manager = manager(EngineConfig::default());
    manager
        .spawn_periodic_cleanup(Duration::from_millis(20), Duration::ZERO)
        .await
        .unwrap();

    let error = manager
        .spawn_periodic_cleanup(Duration::ZERO, Duration::ZERO)
        .await
        .unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::InvalidInput);

    let task_id = manager
        .submit("quick", vec![echo_step("noop", json!(1))], TaskContext::new(), None)
        .await
        .unwrap();
    manager
        .wait_for(&task_id, Some(Duration::from_secs(1)))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(manager.status(&task_id).await.is_none());
}

#[tokio::test]
async fn list_returns_newest_first() {
    let manager = manager(EngineConfig::default());
    let first = manager
        .submit("first", vec![echo_step("noop", json!(1))], TaskContext::new(), None)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = manager
        .submit("second", vec![echo_step("noop", json!(2))], TaskContext::new(), None)
        .await
        .unwrap();

    let listed: Vec<TaskId> = manager
        .list()
        .await
        .into_iter()
        .map(|result| result.task_id)
        .collect();
    assert_eq!(listed, vec![second, first]);
}

#[tokio::test]
async fn shutdown_cancels_active_tasks_and_rejects_new_work() {
    let manager = manager(
        EngineConfig::default()
            .max_concurrent_tasks(1)
            .shutdown_grace_period(Duration::from_millis(100)),
    );
    let invocations = Arc::new(AtomicUsize::new(0));

    let running = manager
        .submit("running", vec![blocking_step("hang")], TaskContext::new(), None)
        .await
        .unwrap();
    let queued_step = StepDefinition::new("never", {
        let invocations = invocations.clone();
        move |_, _| {
            invocations.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, BoxError>(Value::Null) }
        }
    });
    let queued = manager
        .submit("queued", vec![queued_step], TaskContext::new(), None)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    tokio::time::timeout(Duration::from_secs(2), manager.shutdown())
        .await
        .expect("shutdown should finish within its grace period");

    assert_eq!(
        manager.status(&running).await.unwrap().state,
        TaskState::Cancelled
    );
    assert_eq!(
        manager.status(&queued).await.unwrap().state,
        TaskState::Cancelled
    );
    assert_eq!(invocations.load(Ordering::SeqCst), 0);

    let error = manager
        .submit("late", vec![echo_step("noop", json!(1))], TaskContext::new(), None)
        .await
        .unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::ShuttingDown);
}

#[tokio::test]
async fn default_manager_is_a_single_shared_instance() {
    let first = default_manager();
    let second = default_manager();
    assert!(std::ptr::eq(first, second));
    assert!(first.config().max_concurrent_tasks > 0);
}

mod args;
mod error;
mod pipeline;

use std::process::ExitCode;
use std::sync::Arc;

use conductor_core::{
    ChannelProgressObserver, EngineConfig, ProgressEvent, TaskManager, TaskResult, TaskState,
};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing_subscriber::EnvFilter;

use crate::args::{Command, RunArgs, USAGE};
use crate::error::CliError;
use crate::pipeline::Pipeline;

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    match execute(std::env::args().skip(1)).await {
        Ok(code) => code,
        Err(error) => {
            eprintln!("conductor: {error}");
            if matches!(error, CliError::Usage(_)) {
                eprintln!("{USAGE}");
            }
            ExitCode::from(error.exit_code())
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

async fn execute(args: impl Iterator<Item = String>) -> Result<ExitCode, CliError> {
    match args::parse(args)? {
        Command::Help => {
            println!("{USAGE}");
            Ok(ExitCode::SUCCESS)
        }
        Command::Run(run_args) => run(run_args).await,
    }
}

async fn run(run_args: RunArgs) -> Result<ExitCode, CliError> {
    let mut config = EngineConfig::from_env()?;
    if let Some(max_concurrent) = run_args.max_concurrent {
        config = config.max_concurrent_tasks(max_concurrent);
    }

    let pipeline = Pipeline::load(&run_args.pipeline)?;
    let (observer, mut events) = ChannelProgressObserver::new();
    let manager = TaskManager::new(config, Arc::new(observer))?;
    let task_id = manager.submit_task(pipeline.into_submission()).await?;

    let interrupt = {
        let manager = manager.clone();
        let task_id = task_id.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!(task_id = %task_id, "interrupt received, cancelling task");
                manager.cancel(&task_id).await;
            }
        })
    };

    let waiter = manager.wait_for(&task_id, run_args.wait);
    tokio::pin!(waiter);
    let mut result = loop {
        tokio::select! {
            result = &mut waiter => break result?,
            Some(event) = events.recv() => emit_event(&event)?,
        }
    };
    interrupt.abort();

    if !result.is_terminal() {
        tracing::warn!(
            task_id = %task_id,
            state = ?result.state,
            "wait limit reached before the task finished, shutting down"
        );
        manager.shutdown().await;
        if let Some(latest) = manager.status(&task_id).await {
            result = latest;
        }
    }

    drain_events(&mut events)?;
    emit_result(&result)?;

    Ok(exit_code_for(&result))
}

fn drain_events(events: &mut UnboundedReceiver<ProgressEvent>) -> Result<(), CliError> {
    while let Ok(event) = events.try_recv() {
        emit_event(&event)?;
    }
    Ok(())
}

fn emit_event(event: &ProgressEvent) -> Result<(), CliError> {
    let timestamp = OffsetDateTime::now_utc().format(&Rfc3339)?;
    println!("{timestamp} {}", serde_json::to_string(event)?);
    Ok(())
}

fn emit_result(result: &TaskResult) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(result)?);
    Ok(())
}

fn exit_code_for(result: &TaskResult) -> ExitCode {
    if result.state == TaskState::Completed {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    }
}

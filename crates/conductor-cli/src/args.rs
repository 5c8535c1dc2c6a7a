use std::path::PathBuf;
use std::time::Duration;

use crate::error::CliError;

pub const USAGE: &str = "\
usage: conductor run <pipeline.json> [--max-concurrent N] [--wait-secs N]

Runs a pipeline file, printing progress events as JSON lines followed by the final result.

environment:
  RUST_LOG                          log filter for stderr diagnostics (default: info)
  CONDUCTOR_MAX_CONCURRENT_TASKS    concurrency cap (default: 5)
  CONDUCTOR_CANCEL_GRACE_MS         grace period before an interrupt (default: 5000)
  CONDUCTOR_SHUTDOWN_GRACE_MS       grace period at shutdown (default: 10000)";

#[derive(Debug, Eq, PartialEq)]
pub enum Command {
    Run(RunArgs),
    Help,
}

#[derive(Debug, Eq, PartialEq)]
pub struct RunArgs {
    pub pipeline: PathBuf,
    pub max_concurrent: Option<usize>,
    pub wait: Option<Duration>,
}

pub fn parse<I>(args: I) -> Result<Command, CliError>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    match args.next().as_deref() {
        Some("run") => parse_run(args).map(Command::Run),
        Some("help" | "-h" | "--help") => Ok(Command::Help),
        Some(other) => Err(CliError::usage(format!("unknown command '{other}'"))),
        None => Err(CliError::usage("missing command")),
    }
}

fn parse_run(mut args: impl Iterator<Item = String>) -> Result<RunArgs, CliError> {
    let mut pipeline = None;
    let mut max_concurrent = None;
    let mut wait = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--max-concurrent" => {
                let value = parse_number(&arg, args.next())?;
                if value == 0 {
                    return Err(CliError::usage("--max-concurrent must be greater than zero"));
                }
                max_concurrent = Some(usize::try_from(value).unwrap_or(usize::MAX));
            }
            "--wait-secs" => {
                wait = Some(Duration::from_secs(parse_number(&arg, args.next())?));
            }
            flag if flag.starts_with("--") => {
                return Err(CliError::usage(format!("unknown flag '{flag}'")));
            }
            _ if pipeline.is_none() => pipeline = Some(PathBuf::from(&arg)),
            _ => return Err(CliError::usage(format!("unexpected argument '{arg}'"))),
        }
    }

    let pipeline = pipeline.ok_or_else(|| CliError::usage("missing pipeline file"))?;
    Ok(RunArgs {
        pipeline,
        max_concurrent,
        wait,
    })
}

fn parse_number(flag: &str, value: Option<String>) -> Result<u64, CliError> {
    let value = value.ok_or_else(|| CliError::usage(format!("{flag} requires a value")))?;
    value
        .parse()
        .map_err(|_| CliError::usage(format!("{flag} expects a whole number, got '{value}'")))
}

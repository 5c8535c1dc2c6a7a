use std::path::PathBuf;

use conductor_core::CoreError;
use thiserror::Error;

pub const EXIT_USAGE: u8 = 2;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Usage(String),
    #[error("failed to read pipeline '{}': {source}", path.display())]
    ReadPipeline {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid pipeline '{}': {source}", path.display())]
    ParsePipeline {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("engine rejected the request: {0}")]
    Engine(#[from] CoreError),
    #[error("failed to encode output: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to format timestamp: {0}")]
    Timestamp(#[from] time::error::Format),
}

impl CliError {
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage(message.into())
    }

    pub fn exit_code(&self) -> u8 {
        EXIT_USAGE
    }
}

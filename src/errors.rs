use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OpsError {
    #[error("malformed mailbox document {path}: {source}")]
    MalformedDocument {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid command: {0}")]
    InvalidCommand(String),
    #[error("invalid configuration value for {key}: {reason}")]
    InvalidConfig { key: &'static str, reason: String },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("{program} exited with {status}: {stderr}")]
    CommandFailed {
        program: &'static str,
        status: String,
        stderr: String,
    },
    #[error("no task id in task backend output: {0}")]
    TaskIdMissing(String),
}

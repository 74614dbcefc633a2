use std::process::Stdio;
use std::time::Duration;

use anyhow::Result;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{error, info};

use crate::config::WatchdogConfig;
use crate::errors::OpsError;
use crate::mailbox::RestartStatus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartOutcome {
    Succeeded,
    Failed(String),
}

impl RestartOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RestartOutcome::Succeeded)
    }

    pub fn status(&self) -> RestartStatus {
        if self.is_success() {
            RestartStatus::Ok
        } else {
            RestartStatus::Error
        }
    }

    /// Human readable outcome: `ok` or `error: <diagnostic>`.
    pub fn message(&self) -> String {
        match self {
            RestartOutcome::Succeeded => "ok".to_string(),
            RestartOutcome::Failed(diagnostic) => format!("error: {diagnostic}"),
        }
    }

    /// Value for the `error` field of the published result.
    pub fn error_text(&self) -> String {
        match self {
            RestartOutcome::Succeeded => String::new(),
            RestartOutcome::Failed(_) => self.message(),
        }
    }
}

/// Restarts the supervised server. Implementations bound their own runtime
/// and report failures as a value.
pub trait ProcessController {
    async fn restart(&self) -> RestartOutcome;
}

#[derive(Debug, Clone)]
pub struct CommandController {
    container: String,
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandController {
    pub fn from_config(config: &WatchdogConfig) -> Result<Self> {
        Self::new(
            &config.restart_command,
            &config.container_name,
            config.restart_timeout,
        )
    }

    /// `command_line` may reference the container as `{container}`.
    pub fn new(command_line: &str, container: &str, timeout: Duration) -> Result<Self> {
        let tokens = shell_words::split(command_line)
            .map_err(|err| OpsError::InvalidCommand(err.to_string()))?;
        if tokens.is_empty() {
            return Err(OpsError::InvalidCommand("command cannot be empty".to_string()).into());
        }

        let tokens: Vec<String> = tokens
            .into_iter()
            .map(|token| token.replace("{container}", container))
            .collect();

        Ok(Self {
            container: container.to_string(),
            program: tokens[0].clone(),
            args: tokens[1..].to_vec(),
            timeout,
        })
    }

    #[cfg(test)]
    pub fn container(&self) -> &str {
        &self.container
    }
}

impl ProcessController for CommandController {
    async fn restart(&self) -> RestartOutcome {
        info!("restarting container {}", self.container);

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let outcome = match timeout(self.timeout, command.output()).await {
            Ok(Ok(output)) if output.status.success() => RestartOutcome::Succeeded,
            Ok(Ok(output)) => {
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
                let diagnostic = if !stderr.is_empty() {
                    stderr
                } else if !stdout.is_empty() {
                    stdout
                } else {
                    format!("restart command exited with {:?}", output.status.code())
                };
                RestartOutcome::Failed(diagnostic)
            }
            Ok(Err(err)) => RestartOutcome::Failed(err.to_string()),
            Err(_) => RestartOutcome::Failed("timeout".to_string()),
        };

        match &outcome {
            RestartOutcome::Succeeded => info!("container {} restarted", self.container),
            RestartOutcome::Failed(diagnostic) => {
                error!("restart of container {} failed: {diagnostic}", self.container)
            }
        }
        outcome
    }
}

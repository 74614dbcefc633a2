use std::fmt::Write as _;
use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{Context, Result};
use regex::Regex;
use tokio::process::Command;
use tokio::time::{sleep, Duration, Instant};
use tracing::{info, warn};

use crate::errors::OpsError;
use crate::review::model::{Issue, Priority};

const TASK_ID_PATTERN: &str = r"slime-arena-\w+";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeveloperModel {
    Opus,
    Codex,
}

impl DeveloperModel {
    /// Developer for the given 0-based iteration; `None` once escalation is due.
    pub fn for_iteration(iteration: u32) -> Option<Self> {
        match iteration {
            0..=2 => Some(DeveloperModel::Opus),
            3..=4 => Some(DeveloperModel::Codex),
            _ => None,
        }
    }

    pub fn id(self) -> &'static str {
        match self {
            DeveloperModel::Opus => "opus",
            DeveloperModel::Codex => "codex",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            DeveloperModel::Opus => "Claude Opus 4.5",
            DeveloperModel::Codex => "ChatGPT 5.2 Codex",
        }
    }
}

#[derive(Debug, Clone)]
pub struct FixRequest {
    pub pr: u64,
    pub issues: Vec<Issue>,
    pub model: DeveloperModel,
    pub attempt: u32,
    pub max_attempts: u32,
}

impl FixRequest {
    pub fn title(&self) -> String {
        format!(
            "Fix: Review issues ({}, attempt {})",
            self.model.id(),
            self.attempt
        )
    }

    /// `0` when any issue is P0 or the attempt is late, `1` otherwise.
    pub fn priority(&self) -> u8 {
        let has_p0 = self.issues.iter().any(|issue| issue.priority == Priority::P0);
        if has_p0 || self.attempt > 3 {
            0
        } else {
            1
        }
    }

    pub fn description(&self) -> String {
        let name = self.model.display_name();
        let mut out = String::new();

        let _ = writeln!(out, "### Code Review Issues (PR #{})\n", self.pr);
        let _ = writeln!(out, "**Developer:** {name}");
        let _ = writeln!(out, "**Attempt:** {}/{}\n", self.attempt, self.max_attempts);

        for issue in &self.issues {
            let _ = writeln!(out, "**[{}]** {}", issue.priority, issue.location());
            let _ = writeln!(out, "- Problem: {}", issue.problem);
            if !issue.solution.is_empty() {
                let _ = writeln!(out, "- Solution: {}", issue.solution);
            }
            out.push('\n');
        }

        let _ = writeln!(out, "**IMPORTANT:** sign the fix comment in the PR as:");
        let _ = writeln!(
            out,
            "```\nFixed by {name} (Attempt {}/{})\n```",
            self.attempt, self.max_attempts
        );
        out
    }
}

/// Task tracker plus the repository the developer pushes to.
pub trait TaskBackend {
    /// Creates a fix task and returns its id.
    async fn create_task(&self, request: &FixRequest) -> Result<String>;
    /// Fetches upstream changes into the local checkout.
    async fn pull(&self) -> Result<()>;
    async fn head_commit(&self) -> Result<String>;
}

/// Waits until HEAD moves away from `baseline`. Returns false on timeout.
pub async fn wait_for_new_commit<B: TaskBackend>(
    backend: &B,
    baseline: &str,
    poll_interval: Duration,
    timeout: Duration,
) -> Result<bool> {
    let started = Instant::now();

    while started.elapsed() < timeout {
        if let Err(err) = backend.pull().await {
            warn!("git pull failed: {err:#}");
        }
        let head = backend.head_commit().await?;
        if head != baseline {
            info!("new commit {head} detected");
            return Ok(true);
        }
        sleep(poll_interval).await;
    }

    Ok(false)
}

/// `bd` issue tracker and a local `git` checkout.
pub struct BeadsBackend {
    beads_cwd: PathBuf,
    repo_path: PathBuf,
    task_id: Regex,
}

impl BeadsBackend {
    pub fn new(beads_cwd: PathBuf, repo_path: PathBuf) -> Result<Self> {
        Ok(Self {
            beads_cwd,
            repo_path,
            task_id: Regex::new(TASK_ID_PATTERN).context("invalid task id pattern")?,
        })
    }

    fn parse_task_id(&self, output: &str) -> Result<String> {
        self.task_id
            .find(output)
            .map(|found| found.as_str().to_string())
            .ok_or_else(|| OpsError::TaskIdMissing(output.trim().to_string()).into())
    }

    async fn git(&self, args: &[&str]) -> Result<String> {
        run_captured("git", Command::new("git").args(args).current_dir(&self.repo_path)).await
    }
}

impl TaskBackend for BeadsBackend {
    async fn create_task(&self, request: &FixRequest) -> Result<String> {
        let title = request.title();
        let priority = request.priority().to_string();
        let description = request.description();

        let stdout = run_captured(
            "bd",
            Command::new("bd")
                .args(["create", "--title", title.as_str(), "--type", "bug"])
                .args(["--priority", priority.as_str(), "--description", description.as_str()])
                .current_dir(&self.beads_cwd),
        )
        .await?;
        self.parse_task_id(&stdout)
    }

    async fn pull(&self) -> Result<()> {
        self.git(&["pull"]).await.map(|_| ())
    }

    async fn head_commit(&self) -> Result<String> {
        Ok(self.git(&["rev-parse", "HEAD"]).await?.trim().to_string())
    }
}

async fn run_captured(program: &'static str, command: &mut Command) -> Result<String> {
    let output = command
        .stdin(Stdio::null())
        .output()
        .await
        .with_context(|| format!("failed to run {program}"))?;

    if !output.status.success() {
        return Err(OpsError::CommandFailed {
            program,
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }
        .into());
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

use std::fmt;

use anyhow::Result;
use tokio::time::{sleep, Duration, Instant};
use tracing::{info, warn};

use crate::config::ReviewConfig;
use crate::review::consensus::{calculate_consensus, extract_blocking_issues};
use crate::review::developer::{wait_for_new_commit, DeveloperModel, FixRequest, TaskBackend};
use crate::review::model::{Reviews, MAIN_REVIEWERS};
use crate::review::parser::ReviewParser;
use crate::review::source::CommentSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Success,
    Timeout,
    EscalateToHuman,
}

impl CycleOutcome {
    pub fn exit_code(self) -> i32 {
        match self {
            CycleOutcome::Success => 0,
            CycleOutcome::Timeout => 1,
            CycleOutcome::EscalateToHuman => 2,
        }
    }
}

impl fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CycleOutcome::Success => "success",
            CycleOutcome::Timeout => "timeout",
            CycleOutcome::EscalateToHuman => "escalate_to_human",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CycleSettings {
    pub review_poll_interval: Duration,
    pub review_wait_timeout: Duration,
    pub fix_poll_interval: Duration,
    pub fix_wait_timeout: Duration,
    pub max_iterations: u32,
}

impl CycleSettings {
    pub fn from_config(config: &ReviewConfig) -> Self {
        Self {
            review_poll_interval: config.review_poll_interval,
            review_wait_timeout: config.review_wait_timeout,
            fix_poll_interval: config.fix_poll_interval,
            fix_wait_timeout: config.fix_wait_timeout,
            max_iterations: config.max_iterations,
        }
    }
}

/// Review, request fixes, wait for a commit, review again.
pub struct ReviewCycle<S, B> {
    pr: u64,
    source: S,
    backend: B,
    parser: ReviewParser,
    settings: CycleSettings,
    iteration: u32,
}

impl<S, B> ReviewCycle<S, B>
where
    S: CommentSource,
    B: TaskBackend,
{
    pub fn new(pr: u64, source: S, backend: B, settings: CycleSettings) -> Result<Self> {
        Ok(Self {
            pr,
            source,
            backend,
            parser: ReviewParser::new()?,
            settings,
            iteration: 0,
        })
    }

    #[cfg(test)]
    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub async fn run(&mut self) -> Result<CycleOutcome> {
        while self.iteration < self.settings.max_iterations {
            info!("PR #{}: review iteration {}", self.pr, self.iteration);

            let reviews = self.collect_reviews().await?;
            let consensus = calculate_consensus(&reviews);
            if consensus.reached {
                info!(
                    "consensus reached ({}/{} approved)",
                    consensus.approved_count, consensus.total_main_reviewers
                );
                return Ok(CycleOutcome::Success);
            }

            let issues = extract_blocking_issues(&self.parser, &reviews);
            info!(
                "no consensus ({}/{} approved); {} blocking issues",
                consensus.approved_count,
                consensus.total_main_reviewers,
                issues.len()
            );

            let Some(model) = DeveloperModel::for_iteration(self.iteration) else {
                warn!("developer attempts exhausted; escalating to a human");
                return Ok(CycleOutcome::EscalateToHuman);
            };

            let baseline = self.backend.head_commit().await?;
            let request = FixRequest {
                pr: self.pr,
                issues,
                model,
                attempt: self.iteration + 1,
                max_attempts: self.settings.max_iterations,
            };
            let task_id = self.backend.create_task(&request).await?;
            info!(
                "created fix task {task_id} for {} (attempt {})",
                model.display_name(),
                request.attempt
            );

            let fixed = wait_for_new_commit(
                &self.backend,
                &baseline,
                self.settings.fix_poll_interval,
                self.settings.fix_wait_timeout,
            )
            .await?;
            if !fixed {
                warn!(
                    "no fix commit within {}s",
                    self.settings.fix_wait_timeout.as_secs()
                );
                return Ok(CycleOutcome::Timeout);
            }

            self.iteration += 1;
        }

        warn!(
            "review iterations exhausted after {}; escalating to a human",
            self.settings.max_iterations
        );
        Ok(CycleOutcome::EscalateToHuman)
    }

    /// Polls the comment feed until every main reviewer has reported on the
    /// current iteration or the wait times out; returns what is available.
    async fn collect_reviews(&self) -> Result<Reviews> {
        let started = Instant::now();

        loop {
            let comments = self.source.fetch_comments(self.pr).await?;
            let reviews = self.parser.latest_reviews(&comments);

            let waiting: Vec<&str> = MAIN_REVIEWERS
                .iter()
                .copied()
                .filter(|reviewer| {
                    reviews
                        .get(*reviewer)
                        .map(|review| review.iteration < self.iteration)
                        .unwrap_or(true)
                })
                .collect();
            if waiting.is_empty() {
                return Ok(reviews);
            }
            if started.elapsed() >= self.settings.review_wait_timeout {
                warn!(
                    "reviews from {} did not arrive in time; continuing without them",
                    waiting.join(", ")
                );
                return Ok(reviews);
            }

            info!("waiting for reviews from {}", waiting.join(", "));
            sleep(self.settings.review_poll_interval).await;
        }
    }
}

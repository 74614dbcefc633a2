//! Health polling with threshold-triggered automatic restarts.

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::time::Instant;
use tracing::{error, info, warn};
use url::Url;

use crate::config::WatchdogConfig;
use crate::controller::ProcessController;
use crate::mailbox::{now_epoch_millis, timestamp_now};
use crate::notifier::{health_message, Notifier};
use crate::restart::RestartContext;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Healthy,
    Status(u16),
    Timeout,
    Unreachable(String),
}

impl std::fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeOutcome::Healthy => write!(f, "healthy"),
            ProbeOutcome::Status(code) => write!(f, "status {code}"),
            ProbeOutcome::Timeout => write!(f, "timeout"),
            ProbeOutcome::Unreachable(reason) => write!(f, "unreachable: {reason}"),
        }
    }
}

pub trait HealthProbe {
    async fn probe(&self) -> ProbeOutcome;
}

pub struct HttpProbe {
    client: reqwest::Client,
    url: Url,
}

impl HttpProbe {
    pub fn new(url: Url, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(1)
            .build()
            .context("failed to build health HTTP client")?;
        Ok(Self { client, url })
    }
}

impl HealthProbe for HttpProbe {
    async fn probe(&self) -> ProbeOutcome {
        match self.client.get(self.url.clone()).send().await {
            Ok(response) if response.status() == reqwest::StatusCode::OK => ProbeOutcome::Healthy,
            Ok(response) => ProbeOutcome::Status(response.status().as_u16()),
            Err(err) if err.is_timeout() => ProbeOutcome::Timeout,
            Err(err) => ProbeOutcome::Unreachable(err.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthPhase {
    Probing,
    CoolingDown { since: Instant },
}

pub struct HealthMonitor {
    interval: Duration,
    cooldown: Duration,
    threshold: u32,
    fail_count: u32,
    last_check: Option<Instant>,
    phase: HealthPhase,
}

impl HealthMonitor {
    pub fn new(interval: Duration, cooldown: Duration, threshold: u32) -> Self {
        Self {
            interval,
            cooldown,
            threshold: threshold.max(1),
            fail_count: 0,
            last_check: None,
            phase: HealthPhase::Probing,
        }
    }

    pub fn from_config(config: &WatchdogConfig) -> Self {
        Self::new(
            config.health_interval,
            config.cooldown_after_restart,
            config.health_fail_threshold,
        )
    }

    #[cfg(test)]
    pub fn fail_count(&self) -> u32 {
        self.fail_count
    }

    #[cfg(test)]
    pub fn phase(&self) -> HealthPhase {
        self.phase
    }

    /// False while cooling down after an automatic restart; otherwise true
    /// once the probe interval has elapsed.
    pub fn should_check(&mut self) -> bool {
        let now = Instant::now();
        if let HealthPhase::CoolingDown { since } = self.phase {
            if now.duration_since(since) < self.cooldown {
                return false;
            }
            info!("post-restart cooldown elapsed; resuming health checks");
            self.phase = HealthPhase::Probing;
        }

        self.last_check
            .map(|last| now.duration_since(last) >= self.interval)
            .unwrap_or(true)
    }

    pub async fn check_health<P: HealthProbe>(&mut self, probe: &P) -> bool {
        self.last_check = Some(Instant::now());

        match probe.probe().await {
            ProbeOutcome::Healthy => {
                if self.fail_count > 0 {
                    info!("server recovered after {} failed health checks", self.fail_count);
                }
                self.fail_count = 0;
                true
            }
            failure => {
                self.fail_count = self.fail_count.saturating_add(1);
                warn!(
                    "health check failed ({failure}); {} consecutive failures",
                    self.fail_count
                );
                false
            }
        }
    }

    pub async fn handle_failures<C, N>(&mut self, ctx: &RestartContext<C, N>)
    where
        C: ProcessController,
        N: Notifier,
    {
        if self.fail_count < self.threshold {
            return;
        }

        let failures = self.fail_count;
        error!(
            "health check failure threshold reached ({failures}/{}); restarting automatically",
            self.threshold
        );

        let outcome = ctx.controller.restart().await;
        if outcome.is_success() {
            self.phase = HealthPhase::CoolingDown {
                since: Instant::now(),
            };
            let audit_id = format!("auto-health-{}", now_epoch_millis());
            ctx.remember_success(&audit_id, &timestamp_now());
        }

        ctx.notifier
            .notify(&health_message(
                outcome.is_success(),
                &ctx.container,
                failures,
                &outcome.message(),
            ))
            .await;

        self.fail_count = 0;
    }

    pub async fn tick<C, N, P>(&mut self, ctx: &RestartContext<C, N>, probe: &P)
    where
        C: ProcessController,
        N: Notifier,
        P: HealthProbe,
    {
        if !self.should_check() {
            return;
        }
        self.check_health(probe).await;
        self.handle_failures(ctx).await;
    }
}

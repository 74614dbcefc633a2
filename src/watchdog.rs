use std::future::Future;

use anyhow::Result;
use tokio::time::{sleep, Duration, Instant};
use tracing::{error, info, warn};

use crate::config::WatchdogConfig;
use crate::controller::{CommandController, ProcessController};
use crate::health::{HealthMonitor, HealthProbe, HttpProbe};
use crate::mailbox::Mailbox;
use crate::notifier::{ChannelNotifier, Notifier};
use crate::outbox::OutboxReceiver;
use crate::recovery::RecoveryRunner;
use crate::restart::RestartContext;

pub struct Watchdog<C, N, P> {
    ctx: RestartContext<C, N>,
    probe: P,
    recovery: RecoveryRunner,
    outbox: OutboxReceiver,
    health: HealthMonitor,
    outbox_interval: Duration,
    tick: Duration,
    error_backoff: Duration,
    last_outbox_poll: Option<Instant>,
}

impl Watchdog<CommandController, ChannelNotifier, HttpProbe> {
    pub fn from_config(config: &WatchdogConfig) -> Result<Self> {
        Ok(Self::new(
            config,
            CommandController::from_config(config)?,
            ChannelNotifier::from_config(config)?,
            HttpProbe::new(config.health_url.clone(), config.health_timeout)?,
        ))
    }
}

impl<C, N, P> Watchdog<C, N, P>
where
    C: ProcessController,
    N: Notifier,
    P: HealthProbe,
{
    pub fn new(config: &WatchdogConfig, controller: C, notifier: N, probe: P) -> Self {
        Self {
            ctx: RestartContext::new(
                Mailbox::new(config.shared_dir.clone()),
                controller,
                notifier,
                &config.container_name,
            ),
            probe,
            recovery: RecoveryRunner::new(),
            outbox: OutboxReceiver::new(),
            health: HealthMonitor::from_config(config),
            outbox_interval: config.outbox_interval,
            tick: config.tick,
            error_backoff: config.error_backoff,
            last_outbox_poll: None,
        }
    }

    #[cfg(test)]
    pub fn context(&self) -> &RestartContext<C, N> {
        &self.ctx
    }

    pub async fn startup(&mut self) -> Result<()> {
        self.ctx.mailbox.ensure_layout()?;
        self.recovery.run(&self.ctx).await;
        Ok(())
    }

    /// One pass of the loop body: outbox first, then health.
    pub async fn tick(&mut self) -> Result<()> {
        self.ctx.mailbox.ensure_layout()?;

        let now = Instant::now();
        let outbox_due = self
            .last_outbox_poll
            .map(|last| now.duration_since(last) >= self.outbox_interval)
            .unwrap_or(true);
        if outbox_due {
            self.last_outbox_poll = Some(now);
            self.outbox.poll(&self.ctx).await;
        }

        self.health.tick(&self.ctx, &self.probe).await;
        Ok(())
    }

    /// Runs recovery once, then ticks until `shutdown` resolves. A tick in
    /// flight always completes before the loop exits.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        self.startup().await?;
        tokio::pin!(shutdown);

        loop {
            let pause = match self.tick().await {
                Ok(()) => self.tick,
                Err(err) => {
                    error!("watchdog tick failed: {err:#}");
                    self.error_backoff
                }
            };

            tokio::select! {
                _ = sleep(pause) => {}
                _ = &mut shutdown => {
                    info!("received shutdown signal; stopping watchdog");
                    break;
                }
            }
        }

        Ok(())
    }
}

pub async fn run_foreground(config: WatchdogConfig) -> Result<()> {
    let mut watchdog = Watchdog::from_config(&config)?;

    info!(
        "watchdog started for container {} (shared dir {})",
        config.container_name,
        config.shared_dir.display()
    );
    info!(
        "health endpoint {} every {}s, threshold {}, cooldown {}s",
        config.health_url,
        config.health_interval.as_secs(),
        config.health_fail_threshold,
        config.cooldown_after_restart.as_secs()
    );
    if config.telegram.is_none() {
        warn!("TELEGRAM_BOT_TOKEN or TELEGRAM_CHAT_ID not set; notifications are disabled");
    }

    watchdog.run_until(shutdown_signal()).await?;
    info!("watchdog stopped");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    ctrl = tokio::signal::ctrl_c() => {
                        if let Err(err) = ctrl {
                            warn!("failed to wait for CTRL-C signal: {err}");
                        }
                    }
                    _ = terminate.recv() => {}
                }
                return;
            }
            Err(err) => warn!("failed to install SIGTERM handler: {err}"),
        }
    }

    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to wait for CTRL-C signal: {err}");
    }
}

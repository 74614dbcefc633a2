use std::io;
use std::time::Duration;

use anyhow::Result;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::controller::ProcessController;
use crate::errors::OpsError;
use crate::mailbox::{now_epoch_millis, RestartRequest};
use crate::notifier::{outbox_message, Notifier};
use crate::restart::RestartContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxPhase {
    Idle,
    /// A request was renamed to the processing marker and has not been
    /// completed by this run.
    Claimed,
}

pub struct OutboxReceiver {
    phase: OutboxPhase,
}

impl Default for OutboxReceiver {
    fn default() -> Self {
        Self::new()
    }
}

impl OutboxReceiver {
    pub fn new() -> Self {
        Self {
            phase: OutboxPhase::Idle,
        }
    }

    #[cfg(test)]
    pub fn phase(&self) -> OutboxPhase {
        self.phase
    }

    /// Handles at most one pending restart request. Returns `true` only when
    /// a restart was attempted and its outcome published.
    pub async fn poll<C, N>(&mut self, ctx: &RestartContext<C, N>) -> bool
    where
        C: ProcessController,
        N: Notifier,
    {
        if !ctx.mailbox.has_request() {
            return false;
        }

        info!("restart request detected");
        match self.process(ctx).await {
            Ok(handled) => handled,
            Err(err) => {
                error!("failed to process restart request: {err:#}");
                if self.phase == OutboxPhase::Claimed {
                    warn!("processing marker kept; it will be replayed on the next start");
                }
                false
            }
        }
    }

    async fn process<C, N>(&mut self, ctx: &RestartContext<C, N>) -> Result<bool>
    where
        C: ProcessController,
        N: Notifier,
    {
        self.phase = OutboxPhase::Idle;
        let Some(request) = read_pending(ctx)? else {
            return Ok(false);
        };

        let audit_id = request.audit_id_or("unknown");
        let requested_by = request.requested_by().to_string();
        info!(
            "restart {audit_id} requested by {requested_by} at {}",
            request.requested_at()
        );

        if let Some(state) = ctx.mailbox.load_state()? {
            if state.last_audit_id == audit_id {
                info!("restart {audit_id} was already completed; discarding duplicate request");
                ctx.mailbox.discard_request()?;
                return Ok(false);
            }
        }

        if let Some(delay) = shutdown_delay(&request, now_epoch_millis()) {
            info!(
                "delaying restart {audit_id} by {}ms until scheduled shutdown",
                delay.as_millis()
            );
            sleep(delay).await;
        }

        ctx.mailbox.claim_request()?;
        self.phase = OutboxPhase::Claimed;

        let outcome = ctx.controller.restart().await;
        ctx.record_outcome(&audit_id, &outcome);
        ctx.notifier
            .notify(&outbox_message(
                outcome.is_success(),
                &ctx.container,
                &requested_by,
                &outcome.message(),
                &audit_id,
            ))
            .await;

        ctx.mailbox.clear_processing()?;
        self.phase = OutboxPhase::Idle;
        info!("restart request {audit_id} handled");

        Ok(true)
    }
}

/// Reads the pending request. Malformed requests are deleted so they cannot
/// block later ones.
fn read_pending<C, N>(ctx: &RestartContext<C, N>) -> Result<Option<RestartRequest>> {
    match ctx.mailbox.read_request() {
        Ok(request) => Ok(Some(request)),
        Err(err @ OpsError::MalformedDocument { .. }) => {
            error!("discarding malformed restart request: {err}");
            if let Err(remove_err) = ctx.mailbox.discard_request() {
                warn!("failed to delete malformed restart request: {remove_err:#}");
            }
            Ok(None)
        }
        Err(OpsError::Io(err)) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn shutdown_delay(request: &RestartRequest, now_millis: i64) -> Option<Duration> {
    // Float to int casts saturate and map NaN to zero.
    let shutdown_at = request.shutdown_at?.trunc() as i64;
    let remaining = shutdown_at.saturating_sub(now_millis);
    (remaining > 0).then(|| Duration::from_millis(remaining as u64))
}

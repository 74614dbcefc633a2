use anyhow::Result;
use tracing::{error, info, warn};

use crate::controller::ProcessController;
use crate::notifier::{recovery_message, Notifier};
use crate::restart::RestartContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryPhase {
    NotRun,
    Completed,
}

/// Finishes a restart that a previous run claimed but never completed.
pub struct RecoveryRunner {
    phase: RecoveryPhase,
}

impl Default for RecoveryRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl RecoveryRunner {
    pub fn new() -> Self {
        Self {
            phase: RecoveryPhase::NotRun,
        }
    }

    #[cfg(test)]
    pub fn phase(&self) -> RecoveryPhase {
        self.phase
    }

    pub async fn run<C, N>(&mut self, ctx: &RestartContext<C, N>)
    where
        C: ProcessController,
        N: Notifier,
    {
        if self.phase == RecoveryPhase::Completed {
            return;
        }

        if ctx.mailbox.has_processing() {
            warn!("interrupted restart detected; running recovery");
            if let Err(err) = replay(ctx).await {
                error!("recovery failed: {err:#}");
                // Never leave a marker that would replay on every boot.
                if let Err(remove_err) = ctx.mailbox.purge_processing() {
                    warn!("failed to remove processing marker: {remove_err:#}");
                }
            }
        }

        self.phase = RecoveryPhase::Completed;
    }
}

async fn replay<C, N>(ctx: &RestartContext<C, N>) -> Result<()>
where
    C: ProcessController,
    N: Notifier,
{
    let audit_id = match ctx.mailbox.read_processing() {
        Ok(request) => request.audit_id_or("recovery"),
        Err(err) => {
            warn!("processing marker is unreadable ({err}); replaying as 'recovery'");
            "recovery".to_string()
        }
    };

    let outcome = ctx.controller.restart().await;
    ctx.record_outcome(&audit_id, &outcome);
    ctx.notifier
        .notify(&recovery_message(
            outcome.is_success(),
            &ctx.container,
            &outcome.message(),
            &audit_id,
        ))
        .await;

    ctx.mailbox.clear_processing()?;
    info!("recovery of restart {audit_id} completed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::{RecoveryPhase, RecoveryRunner};
    use crate::controller::{ProcessController, RestartOutcome};
    use crate::mailbox::{Mailbox, RestartStatus};
    use crate::restart::RestartContext;
    use crate::testing::{temp_mailbox, FakeController, RecordingNotifier};

    fn context(mailbox: &Mailbox) -> RestartContext<FakeController, RecordingNotifier> {
        RestartContext::new(
            mailbox.clone(),
            FakeController::succeeding(),
            RecordingNotifier::default(),
            "slime-arena",
        )
    }

    #[tokio::test]
    async fn no_marker_means_no_restart() {
        let mailbox = temp_mailbox("recovery-idle");
        let ctx = context(&mailbox);
        let mut recovery = RecoveryRunner::new();

        recovery.run(&ctx).await;

        assert_eq!(ctx.controller.call_count(), 0);
        assert!(ctx.notifier.messages().is_empty());
        assert_eq!(recovery.phase(), RecoveryPhase::Completed);

        let _ = fs::remove_dir_all(mailbox.root());
    }

    #[tokio::test]
    async fn interrupted_restart_is_replayed_once() {
        let mailbox = temp_mailbox("recovery-replay");
        fs::write(
            mailbox.processing_path(),
            r#"{"auditId":"crash-1","requestedBy":"ops","requestedAt":"t0"}"#,
        )
        .expect("seed marker");
        let ctx = context(&mailbox);
        let mut recovery = RecoveryRunner::new();

        recovery.run(&ctx).await;
        recovery.run(&ctx).await;

        assert_eq!(ctx.controller.call_count(), 1);
        assert!(!mailbox.has_processing());
        let result = mailbox.read_result().expect("readable").expect("present");
        assert_eq!(result.audit_id, "crash-1");
        assert_eq!(result.status, RestartStatus::Ok);
        let state = mailbox.load_state().expect("readable").expect("present");
        assert_eq!(state.last_audit_id, "crash-1");
        let messages = ctx.notifier.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("<b>Recovery restart</b>"));

        let _ = fs::remove_dir_all(mailbox.root());
    }

    #[tokio::test]
    async fn failed_replay_still_removes_marker() {
        let mailbox = temp_mailbox("recovery-failed");
        fs::write(mailbox.processing_path(), r#"{"auditId":"crash-2"}"#).expect("seed marker");
        let ctx = context(&mailbox);
        ctx.controller.push(RestartOutcome::Failed("timeout".to_string()));
        let mut recovery = RecoveryRunner::new();

        recovery.run(&ctx).await;

        assert_eq!(ctx.controller.call_count(), 1);
        assert!(!mailbox.has_processing());
        let result = mailbox.read_result().expect("readable").expect("present");
        assert_eq!(result.status, RestartStatus::Error);
        assert_eq!(result.error, "error: timeout");
        assert!(mailbox.load_state().expect("readable").is_none());

        let _ = fs::remove_dir_all(mailbox.root());
    }

    #[tokio::test]
    async fn corrupt_marker_replays_under_recovery_id() {
        let mailbox = temp_mailbox("recovery-corrupt");
        fs::write(mailbox.processing_path(), "{ truncated").expect("seed marker");
        let ctx = context(&mailbox);
        let mut recovery = RecoveryRunner::new();

        recovery.run(&ctx).await;

        assert_eq!(ctx.controller.call_count(), 1);
        assert!(!mailbox.has_processing());
        let result = mailbox.read_result().expect("readable").expect("present");
        assert_eq!(result.audit_id, "recovery");

        let _ = fs::remove_dir_all(mailbox.root());
    }

    /// Turns the processing marker into a non-empty directory during the
    /// restart, so the regular unlink at the end of the replay fails.
    struct MarkerBlockingController {
        mailbox: Mailbox,
    }

    impl ProcessController for MarkerBlockingController {
        async fn restart(&self) -> RestartOutcome {
            fs::remove_file(self.mailbox.processing_path()).expect("drop marker");
            fs::create_dir_all(self.mailbox.processing_path().join("inner"))
                .expect("block marker");
            RestartOutcome::Succeeded
        }
    }

    #[tokio::test]
    async fn cleanup_failure_during_replay_falls_back_to_purge() {
        let mailbox = temp_mailbox("recovery-blocked");
        fs::write(mailbox.processing_path(), r#"{"auditId":"crash-3"}"#).expect("seed marker");
        let ctx = RestartContext::new(
            mailbox.clone(),
            MarkerBlockingController {
                mailbox: mailbox.clone(),
            },
            RecordingNotifier::default(),
            "slime-arena",
        );
        let mut recovery = RecoveryRunner::new();

        recovery.run(&ctx).await;

        assert_eq!(recovery.phase(), RecoveryPhase::Completed);
        assert!(
            !mailbox.processing_path().exists(),
            "fallback cleanup must remove the blocked marker"
        );
        let result = mailbox.read_result().expect("readable").expect("present");
        assert_eq!(result.audit_id, "crash-3");
        assert_eq!(ctx.notifier.messages().len(), 1);

        let _ = fs::remove_dir_all(mailbox.root());
    }
}

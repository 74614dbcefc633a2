use tracing::{error, info};

use crate::controller::{ProcessController, RestartOutcome};
use crate::mailbox::{timestamp_now, Mailbox, RestartResult, WatchdogState};
use crate::notifier::Notifier;

/// Everything a restart path needs: where to publish, what to restart and
/// whom to tell.
pub struct RestartContext<C, N> {
    pub mailbox: Mailbox,
    pub controller: C,
    pub notifier: N,
    pub container: String,
}

impl<C, N> RestartContext<C, N>
where
    C: ProcessController,
    N: Notifier,
{
    pub fn new(mailbox: Mailbox, controller: C, notifier: N, container: impl Into<String>) -> Self {
        Self {
            mailbox,
            controller,
            notifier,
            container: container.into(),
        }
    }

    /// Publishes the outcome of a completed restart. Write failures are
    /// logged; the restart itself already happened.
    pub fn record_outcome(&self, audit_id: &str, outcome: &RestartOutcome) {
        let timestamp = timestamp_now();
        let result = RestartResult {
            audit_id: audit_id.to_string(),
            status: outcome.status(),
            timestamp: timestamp.clone(),
            error: outcome.error_text(),
        };

        match self.mailbox.write_result(&result) {
            Ok(()) => info!(
                "restart result for {audit_id} written to {}",
                self.mailbox.result_path().display()
            ),
            Err(err) => error!("failed to write restart result for {audit_id}: {err:#}"),
        }

        if outcome.is_success() {
            self.remember_success(audit_id, &timestamp);
        }
    }

    pub fn remember_success(&self, audit_id: &str, timestamp: &str) {
        let state = WatchdogState {
            last_audit_id: audit_id.to_string(),
            last_restart_time: timestamp.to_string(),
        };
        if let Err(err) = self.mailbox.save_state(&state) {
            error!("failed to record completed restart {audit_id}: {err:#}");
        }
    }
}

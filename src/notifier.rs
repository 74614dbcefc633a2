use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::json;
use tracing::{error, warn};

use crate::config::{TelegramConfig, WatchdogConfig};

/// Operator channel. Sending is best effort: failures are logged and
/// reported as `false`, never raised.
pub trait Notifier {
    async fn notify(&self, message: &str) -> bool;
}

pub enum ChannelNotifier {
    Telegram(TelegramNotifier),
    Disabled,
}

impl ChannelNotifier {
    pub fn from_config(config: &WatchdogConfig) -> Result<Self> {
        match &config.telegram {
            Some(telegram) => Ok(Self::Telegram(TelegramNotifier::new(
                telegram.clone(),
                config.notify_timeout,
            )?)),
            None => Ok(Self::Disabled),
        }
    }
}

impl Notifier for ChannelNotifier {
    async fn notify(&self, message: &str) -> bool {
        match self {
            ChannelNotifier::Telegram(telegram) => telegram.notify(message).await,
            ChannelNotifier::Disabled => {
                warn!("telegram is not configured; skipping notification");
                false
            }
        }
    }
}

pub struct TelegramNotifier {
    client: reqwest::Client,
    config: TelegramConfig,
}

impl TelegramNotifier {
    pub fn new(config: TelegramConfig, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build telegram HTTP client")?;
        Ok(Self { client, config })
    }

    fn send_url(&self) -> String {
        format!(
            "{}/bot{}/sendMessage",
            self.config.api_base.trim_end_matches('/'),
            self.config.bot_token
        )
    }

    async fn send(&self, message: &str) -> Result<()> {
        self.client
            .post(self.send_url())
            .json(&json!({
                "chat_id": self.config.chat_id,
                "text": message,
                "parse_mode": "HTML",
            }))
            .send()
            .await
            .context("telegram request failed")?
            .error_for_status()
            .context("telegram rejected message")?;
        Ok(())
    }
}

impl Notifier for TelegramNotifier {
    async fn notify(&self, message: &str) -> bool {
        match self.send(message).await {
            Ok(()) => true,
            Err(err) => {
                error!("failed to send telegram notification: {err:#}");
                false
            }
        }
    }
}

pub fn status_glyph(success: bool) -> &'static str {
    if success {
        "✅"
    } else {
        "❌"
    }
}

pub fn outbox_message(
    success: bool,
    container: &str,
    requested_by: &str,
    status: &str,
    audit_id: &str,
) -> String {
    format!(
        "{} <b>Server Restart</b>\nContainer: {container}\nRequested by: {requested_by}\nStatus: {status}\nAudit ID: {audit_id}",
        status_glyph(success)
    )
}

pub fn recovery_message(success: bool, container: &str, status: &str, audit_id: &str) -> String {
    format!(
        "{} <b>Recovery restart</b>\nContainer: {container}\nStatus: {status}\nAudit ID: {audit_id}",
        status_glyph(success)
    )
}

pub fn health_message(success: bool, container: &str, failures: u32, status: &str) -> String {
    format!(
        "🚨 <b>Auto-restart (health failure)</b>\nContainer: {container}\nConsecutive failures: {failures}\nStatus: {} {status}",
        status_glyph(success)
    )
}

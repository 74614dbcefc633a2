//! Shared-directory mailbox used to exchange restart requests and results
//! with the game server process.
//!
//! The server drops `restart-requested`; the watchdog claims it by renaming
//! it to `restart-processing`, then publishes `restart-result` and its own
//! `.watchdog-state`. Both published documents are written to a temporary
//! sibling first and renamed into place.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::OpsError;

pub const REQUESTED_FILE: &str = "restart-requested";
pub const PROCESSING_FILE: &str = "restart-processing";
pub const RESULT_FILE: &str = "restart-result";
pub const STATE_FILE: &str = ".watchdog-state";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RestartRequest {
    #[serde(default)]
    pub audit_id: Option<String>,
    #[serde(default)]
    pub requested_by: Option<String>,
    #[serde(default)]
    pub requested_at: Option<String>,
    /// Epoch milliseconds before which the restart must not start. Any JSON
    /// number is accepted; fractions are truncated when scheduling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shutdown_at: Option<f64>,
}

impl RestartRequest {
    pub fn audit_id_or(&self, fallback: &str) -> String {
        non_empty(self.audit_id.as_deref()).unwrap_or(fallback).to_string()
    }

    pub fn requested_by(&self) -> &str {
        non_empty(self.requested_by.as_deref()).unwrap_or("unknown")
    }

    pub fn requested_at(&self) -> &str {
        non_empty(self.requested_at.as_deref()).unwrap_or("unknown")
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RestartStatus {
    Ok,
    Error,
}

impl std::fmt::Display for RestartStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let value = match self {
            RestartStatus::Ok => "ok",
            RestartStatus::Error => "error",
        };
        write!(f, "{value}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RestartResult {
    pub audit_id: String,
    pub status: RestartStatus,
    pub timestamp: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WatchdogState {
    pub last_audit_id: String,
    pub last_restart_time: String,
}

#[derive(Debug, Clone)]
pub struct Mailbox {
    root: PathBuf,
}

impl Mailbox {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ensure_layout(&self) -> Result<()> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("failed to create mailbox {}", self.root.display()))
    }

    pub fn requested_path(&self) -> PathBuf {
        self.root.join(REQUESTED_FILE)
    }

    pub fn processing_path(&self) -> PathBuf {
        self.root.join(PROCESSING_FILE)
    }

    pub fn result_path(&self) -> PathBuf {
        self.root.join(RESULT_FILE)
    }

    pub fn state_path(&self) -> PathBuf {
        self.root.join(STATE_FILE)
    }

    pub fn has_request(&self) -> bool {
        self.requested_path().exists()
    }

    pub fn has_processing(&self) -> bool {
        self.processing_path().exists()
    }

    pub fn read_request(&self) -> Result<RestartRequest, OpsError> {
        read_document(&self.requested_path())
    }

    pub fn read_processing(&self) -> Result<RestartRequest, OpsError> {
        read_document(&self.processing_path())
    }

    /// Claims the pending request. The rename is the only synchronisation
    /// point with the server; once it succeeds the request is ours.
    pub fn claim_request(&self) -> Result<()> {
        let from = self.requested_path();
        let to = self.processing_path();
        fs::rename(&from, &to).with_context(|| {
            format!("failed to claim {} -> {}", from.display(), to.display())
        })
    }

    pub fn discard_request(&self) -> Result<()> {
        remove_if_present(&self.requested_path())
    }

    pub fn clear_processing(&self) -> Result<()> {
        remove_if_present(&self.processing_path())
    }

    /// Last-resort cleanup: removes the processing marker even if something
    /// replaced it with a directory.
    pub fn purge_processing(&self) -> Result<()> {
        let path = self.processing_path();
        let removed = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        match removed {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("failed to purge {}", path.display())),
        }
    }

    pub fn write_result(&self, result: &RestartResult) -> Result<()> {
        write_atomic(&self.result_path(), result)
    }

    #[cfg(test)]
    pub fn read_result(&self) -> Result<Option<RestartResult>> {
        let path = self.result_path();
        if !path.exists() {
            return Ok(None);
        }
        read_document(&path).map(Some).map_err(Into::into)
    }

    /// Loads the idempotency record. A corrupted record is moved aside so
    /// it cannot block future requests.
    pub fn load_state(&self) -> Result<Option<WatchdogState>> {
        let path = self.state_path();
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read state file {}", path.display()))?;
        if content.trim().is_empty() {
            return Ok(None);
        }

        match serde_json::from_str::<WatchdogState>(&content) {
            Ok(state) => Ok(Some(state)),
            Err(error) => {
                let backup = corrupted_backup_path(&path);
                if let Err(rename_err) = fs::rename(&path, &backup) {
                    warn!(
                        "failed to move corrupted state file {} -> {}: {rename_err}",
                        path.display(),
                        backup.display()
                    );
                } else {
                    warn!(
                        "state file {} is corrupted ({error}), moved to {}",
                        path.display(),
                        backup.display()
                    );
                }
                Ok(None)
            }
        }
    }

    pub fn save_state(&self, state: &WatchdogState) -> Result<()> {
        write_atomic(&self.state_path(), state)
    }
}

pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn now_epoch_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as i64)
        .unwrap_or(0)
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

fn read_document<T>(path: &Path) -> Result<T, OpsError>
where
    T: for<'de> Deserialize<'de>,
{
    let content = fs::read_to_string(path)?;
    serde_json::from_str::<T>(&content).map_err(|source| OpsError::MalformedDocument {
        path: path.to_path_buf(),
        source,
    })
}

fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let payload = serde_json::to_vec_pretty(value)?;
    let tmp_path = tmp_path_for(path);

    fs::write(&tmp_path, payload)
        .with_context(|| format!("failed to write temporary file {}", tmp_path.display()))?;
    replace_file(&tmp_path, path)
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|value| value.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn corrupted_backup_path(path: &Path) -> PathBuf {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let mut name = path
        .file_name()
        .map(|value| value.to_os_string())
        .unwrap_or_default();
    name.push(format!(".corrupt-{suffix}"));
    path.with_file_name(name)
}

fn replace_file(tmp_path: &Path, path: &Path) -> Result<()> {
    match fs::rename(tmp_path, path) {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            #[cfg(windows)]
            {
                if path.exists() {
                    fs::remove_file(path)
                        .with_context(|| format!("failed to remove {}", path.display()))?;
                    fs::rename(tmp_path, path)
                        .with_context(|| format!("failed to replace {}", path.display()))?;
                    return Ok(());
                }
            }

            let _ = fs::remove_file(tmp_path);
            Err(rename_err).with_context(|| format!("failed to replace {}", path.display()))
        }
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("failed to remove {}", path.display())),
    }
}

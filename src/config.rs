use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use url::Url;

use crate::errors::OpsError;

const DEFAULT_SHARED_DIR: &str = "/opt/slime-arena/shared";
const DEFAULT_CONTAINER_NAME: &str = "slime-arena";
const DEFAULT_HEALTH_URL: &str = "http://127.0.0.1:3000/health";
const DEFAULT_RESTART_COMMAND: &str = "docker restart -t 30 {container}";
const DEFAULT_TELEGRAM_API_BASE: &str = "https://api.telegram.org";
const DEFAULT_REVIEW_REPO: &str = "komleff/slime-arena";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
    pub api_base: String,
}

#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    pub shared_dir: PathBuf,
    pub container_name: String,
    pub health_url: Url,
    pub restart_command: String,
    pub restart_timeout: Duration,
    pub telegram: Option<TelegramConfig>,
    pub notify_timeout: Duration,
    pub outbox_interval: Duration,
    pub health_interval: Duration,
    pub health_timeout: Duration,
    pub health_fail_threshold: u32,
    pub cooldown_after_restart: Duration,
    pub tick: Duration,
    pub error_backoff: Duration,
}

impl WatchdogConfig {
    pub fn load() -> Result<Self> {
        load_env_file();

        let shared_dir = env_string("SHARED_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SHARED_DIR));
        let container_name =
            env_string("CONTAINER_NAME").unwrap_or_else(|| DEFAULT_CONTAINER_NAME.to_string());
        let health_url = parse_health_url(
            &env_string("HEALTH_URL").unwrap_or_else(|| DEFAULT_HEALTH_URL.to_string()),
        )?;
        let restart_command =
            env_string("RESTART_COMMAND").unwrap_or_else(|| DEFAULT_RESTART_COMMAND.to_string());
        let telegram = match (env_string("TELEGRAM_BOT_TOKEN"), env_string("TELEGRAM_CHAT_ID")) {
            (Some(bot_token), Some(chat_id)) => Some(TelegramConfig {
                bot_token,
                chat_id,
                api_base: env_string("TELEGRAM_API_BASE")
                    .unwrap_or_else(|| DEFAULT_TELEGRAM_API_BASE.to_string()),
            }),
            _ => None,
        };

        let config = Self {
            shared_dir,
            container_name,
            health_url,
            restart_command,
            restart_timeout: env_secs("RESTART_TIMEOUT", 60),
            telegram,
            notify_timeout: env_secs("NOTIFY_TIMEOUT", 10),
            outbox_interval: env_secs("OUTBOX_CHECK_INTERVAL", 5),
            health_interval: env_secs("HEALTH_CHECK_INTERVAL", 30),
            health_timeout: env_secs("HEALTH_TIMEOUT", 5),
            health_fail_threshold: env_u64("HEALTH_FAIL_THRESHOLD", 3).clamp(1, u32::MAX as u64)
                as u32,
            cooldown_after_restart: env_secs("COOLDOWN_AFTER_RESTART", 60),
            tick: Duration::from_secs(1),
            error_backoff: Duration::from_secs(5),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let tokens = shell_words::split(&self.restart_command).map_err(|err| {
            OpsError::InvalidConfig {
                key: "RESTART_COMMAND",
                reason: err.to_string(),
            }
        })?;
        if tokens.is_empty() {
            return Err(OpsError::InvalidConfig {
                key: "RESTART_COMMAND",
                reason: "command cannot be empty".to_string(),
            }
            .into());
        }
        if self.container_name.trim().is_empty() {
            return Err(OpsError::InvalidConfig {
                key: "CONTAINER_NAME",
                reason: "name cannot be empty".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ReviewConfig {
    pub repo: String,
    pub repo_path: PathBuf,
    pub beads_cwd: PathBuf,
    pub review_poll_interval: Duration,
    pub review_wait_timeout: Duration,
    pub fix_poll_interval: Duration,
    pub fix_wait_timeout: Duration,
    pub max_iterations: u32,
}

impl ReviewConfig {
    pub fn load() -> Result<Self> {
        load_env_file();

        let cwd = env::current_dir().context("failed to resolve current directory")?;
        Ok(Self {
            repo: env_string("REVIEW_REPO").unwrap_or_else(|| DEFAULT_REVIEW_REPO.to_string()),
            repo_path: env_string("REPO_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| cwd.clone()),
            beads_cwd: env_string("BEADS_CWD").map(PathBuf::from).unwrap_or(cwd),
            review_poll_interval: env_secs("REVIEW_POLL_INTERVAL", 30),
            review_wait_timeout: env_secs("REVIEW_WAIT_TIMEOUT", 600),
            fix_poll_interval: env_secs("FIX_POLL_INTERVAL", 60),
            fix_wait_timeout: env_secs("FIX_WAIT_TIMEOUT", 3600),
            max_iterations: env_u64("REVIEW_MAX_ITERATIONS", 5).clamp(1, 100) as u32,
        })
    }
}

fn load_env_file() {
    let loaded = match env_string("ARENA_OPS_ENV_FILE") {
        Some(path) => dotenvy::from_path(path).map(|_| ()),
        None => dotenvy::dotenv().map(|_| ()),
    };
    if let Err(err) = loaded {
        if !err.not_found() {
            tracing::warn!("failed to load .env file: {err}");
        }
    }
}

fn parse_health_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim()).map_err(|err| OpsError::InvalidConfig {
        key: "HEALTH_URL",
        reason: err.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(OpsError::InvalidConfig {
            key: "HEALTH_URL",
            reason: format!("unsupported scheme '{}'", url.scheme()),
        }
        .into());
    }
    Ok(url)
}

fn env_string(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_secs(key: &str, default: u64) -> Duration {
    Duration::from_secs(env_u64(key, default).max(1))
}

//! SeoPilot configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, SeoPilotError};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeoPilotConfig {
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub approvals: ApprovalConfig,
    #[serde(default)]
    pub alerts: AlertConfig,
}

impl Default for SeoPilotConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            scheduler: SchedulerConfig::default(),
            gateway: GatewayConfig::default(),
            approvals: ApprovalConfig::default(),
            alerts: AlertConfig::default(),
        }
    }
}

/// Worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Concurrency bound N — homogeneous workers pulling one shared queue.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Per-invocation handler timeout. Exceeding it fails the task.
    #[serde(default = "default_handler_timeout")]
    pub handler_timeout_secs: u64,
    /// Retry budget for transient handler failures.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay for exponential backoff between attempts.
    #[serde(default = "default_base_backoff")]
    pub base_backoff_ms: u64,
}

fn default_max_workers() -> usize {
    5
}
fn default_handler_timeout() -> u64 {
    300
}
fn default_max_attempts() -> u32 {
    3
}
fn default_base_backoff() -> u64 {
    500
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            handler_timeout_secs: default_handler_timeout(),
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff(),
        }
    }
}

/// Cron scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Tick interval for the cron evaluation loop.
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
    /// SQLite file for schedules and the job execution history.
    /// Empty means `~/.seopilot/scheduler.db`.
    #[serde(default)]
    pub db_path: String,
}

fn default_check_interval() -> u64 {
    30
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval(),
            db_path: String::new(),
        }
    }
}

impl SchedulerConfig {
    pub fn resolved_db_path(&self) -> PathBuf {
        if self.db_path.is_empty() {
            SeoPilotConfig::home_dir().join("scheduler.db")
        } else {
            PathBuf::from(&self.db_path)
        }
    }
}

/// HTTP gateway settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    8710
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Who may approve or reject review-gated tasks. Empty list = anyone.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApprovalConfig {
    #[serde(default)]
    pub approvers: Vec<String>,
}

impl ApprovalConfig {
    pub fn is_permitted(&self, approver: &str) -> bool {
        self.approvers.is_empty() || self.approvers.iter().any(|a| a == approver)
    }
}

/// Outbound alert webhook (fired on task failure and review entry).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertConfig {
    /// Empty disables webhook alerts; events still go to the log.
    #[serde(default)]
    pub webhook_url: String,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
}

impl SeoPilotConfig {
    /// Load config from the default path (~/.seopilot/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SeoPilotError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| SeoPilotError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| SeoPilotError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".seopilot")
    }

    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }
}

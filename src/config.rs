use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::constants::{intervals, limits};
use crate::password::{PasswordConfig, PasswordPolicy};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,

    pub observability: ObservabilityConfig,

    pub controller: ControllerConfig,

    pub admin: AdminConfig,

    pub secrets: SecretsConfig,

    pub claims: ClaimsConfig,

    /// Applied to claims without their own `passwordConfig`.
    #[serde(rename = "passwordConfig")]
    pub password_config: PasswordConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Claim status database.
    pub database_path: String,

    pub log_level: String,

    /// Tokio worker threads; `0` uses the runtime default.
    pub worker_threads: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            database_path: "sqlite:data/dbclaim.db".to_string(),
            log_level: "info".to_string(),
            worker_threads: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub metrics_enabled: bool,

    pub metrics_port: u16,

    pub loki_enabled: bool,

    pub loki_url: String,

    pub loki_labels: std::collections::HashMap<String, String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        let mut labels = std::collections::HashMap::new();
        labels.insert("app".to_string(), "dbclaim".to_string());

        Self {
            metrics_enabled: true,
            metrics_port: 9187,
            loki_enabled: false,
            loki_url: "http://localhost:3100".to_string(),
            loki_labels: labels,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub max_concurrent_reconciles: usize,

    /// Deadline for each statement sent to a database server.
    pub operation_timeout_secs: u64,

    pub backoff_base_ms: u64,

    pub backoff_max_secs: u64,

    /// Drift check for ready claims; `0` disables it.
    pub resync_interval_secs: u64,

    /// Rest after a claim keeps progressing without converging.
    pub progress_pause_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_reconciles: limits::MAX_CONCURRENT_RECONCILES,
            operation_timeout_secs: intervals::OPERATION_TIMEOUT.as_secs(),
            backoff_base_ms: u64::try_from(intervals::BACKOFF_BASE.as_millis()).unwrap_or(500),
            backoff_max_secs: intervals::BACKOFF_MAX.as_secs(),
            resync_interval_secs: intervals::RESYNC.as_secs(),
            progress_pause_ms: u64::try_from(intervals::PROGRESS_PAUSE.as_millis())
                .unwrap_or(1000),
        }
    }
}

impl ControllerConfig {
    #[must_use]
    pub const fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    #[must_use]
    pub const fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    #[must_use]
    pub const fn backoff_max(&self) -> Duration {
        Duration::from_secs(self.backoff_max_secs)
    }

    #[must_use]
    pub const fn progress_pause(&self) -> Duration {
        Duration::from_millis(self.progress_pause_ms)
    }

    #[must_use]
    pub const fn resync_interval(&self) -> Option<Duration> {
        if self.resync_interval_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.resync_interval_secs))
        }
    }
}

/// Administrative login used to provision every claim.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    pub username: String,

    /// Prefer `password_env` outside of local setups.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub password: String,

    /// Environment variable consulted when `password` is empty.
    pub password_env: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            username: "postgres".to_string(),
            password: String::new(),
            password_env: "DBCLAIM_ADMIN_PASSWORD".to_string(),
        }
    }
}

impl AdminConfig {
    pub fn resolve_password(&self) -> Result<String> {
        if !self.password.is_empty() {
            return Ok(self.password.clone());
        }

        std::env::var(&self.password_env).with_context(|| {
            format!(
                "Admin password not configured: set admin.password or {}",
                self.password_env
            )
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretsConfig {
    pub dir: String,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            dir: "data/secrets".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaimsConfig {
    pub path: String,

    pub poll_interval_secs: u64,
}

impl Default for ClaimsConfig {
    fn default() -> Self {
        Self {
            path: "claims.toml".to_string(),
            poll_interval_secs: 30,
        }
    }
}

impl ClaimsConfig {
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let paths = Self::config_paths();

        for path in &paths {
            if path.exists() {
                info!("Loading config from: {}", path.display());
                return Self::load_from_path(path);
            }
        }

        info!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    fn config_paths() -> Vec<PathBuf> {
        let mut paths = vec![];

        paths.push(PathBuf::from("config.toml"));

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("dbclaim").join("config.toml"));
        }

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".dbclaim").join("config.toml"));
        }

        paths
    }

    pub fn validate(&self) -> Result<()> {
        if self.controller.max_concurrent_reconciles == 0 {
            anyhow::bail!("controller.max_concurrent_reconciles must be > 0");
        }

        if self.controller.operation_timeout_secs == 0 {
            anyhow::bail!("controller.operation_timeout_secs must be > 0");
        }

        if self.controller.backoff_base() > self.controller.backoff_max() {
            anyhow::bail!("controller.backoff_base_ms must not exceed backoff_max_secs");
        }

        if self.claims.poll_interval_secs == 0 {
            anyhow::bail!("claims.poll_interval_secs must be > 0");
        }

        if self.admin.username.is_empty() {
            anyhow::bail!("admin.username cannot be empty");
        }

        PasswordPolicy::try_from(&self.password_config)
            .and_then(|policy| policy.check())
            .context("Invalid default passwordConfig")?;

        if self.observability.loki_enabled {
            url::Url::parse(&self.observability.loki_url).context("Invalid Loki URL")?;
        }

        Ok(())
    }
}

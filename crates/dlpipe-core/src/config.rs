use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::retry::BackoffPolicy;

/// Retry policy parameters (optional section in config.toml).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt, per phase and per task.
    pub max_retries: u32,
    /// Delay before the first retry, in seconds (e.g. 0.25 = 250ms).
    pub initial_backoff_secs: f64,
    /// Maximum backoff delay in seconds.
    pub max_backoff_secs: f64,
    /// Randomly stretch each delay (still capped at the maximum).
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_secs: 5.0,
            max_backoff_secs: 60.0,
            jitter: false,
        }
    }
}

/// What a task that exhausts its retries does to the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskFailurePolicy {
    /// Record the failure, finish the batch, exit successfully.
    #[default]
    Continue,
    /// Finish the batch and report it, then exit with failure.
    FailRun,
    /// Cancel the remaining downloads and fail the run without a report.
    Abort,
}

impl fmt::Display for TaskFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskFailurePolicy::Continue => write!(f, "continue"),
            TaskFailurePolicy::FailRun => write!(f, "fail-run"),
            TaskFailurePolicy::Abort => write!(f, "abort"),
        }
    }
}

impl FromStr for TaskFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "continue" => Ok(TaskFailurePolicy::Continue),
            "fail-run" => Ok(TaskFailurePolicy::FailRun),
            "abort" => Ok(TaskFailurePolicy::Abort),
            other => Err(format!(
                "unknown task failure policy '{}' (expected continue, fail-run or abort)",
                other
            )),
        }
    }
}

/// Problems found by `PipelineConfig::validate`. Reported before any phase runs.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("concurrency must be at least 1")]
    ZeroConcurrency,
    #[error("{name} must be a finite, non-negative number of seconds (got {value})")]
    InvalidInterval { name: &'static str, value: f64 },
    #[error("initial backoff ({initial:?}) exceeds max backoff ({max:?})")]
    InitialExceedsMax { initial: Duration, max: Duration },
}

/// Global configuration loaded from `~/.config/dlpipe/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Maximum downloads in flight at once.
    pub concurrency: usize,
    /// What a task that exhausts its retries does to the run.
    #[serde(default)]
    pub on_task_failure: TaskFailurePolicy,
    /// Log every failed attempt at warn level.
    #[serde(default)]
    pub verbose: bool,
    /// Optional retry policy; if missing, built-in defaults are used.
    #[serde(default)]
    pub retry: Option<RetryConfig>,
    /// Site-specific settings, passed through untouched.
    #[serde(default)]
    pub site: toml::Table,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let mut site = toml::Table::new();
        site.insert("manifest".into(), toml::Value::String("tasks.toml".into()));
        site.insert("output_dir".into(), toml::Value::String("downloads".into()));
        Self {
            concurrency: 4,
            on_task_failure: TaskFailurePolicy::default(),
            verbose: false,
            retry: None,
            site,
        }
    }
}

impl PipelineConfig {
    /// Retry parameters, falling back to built-in defaults.
    pub fn retry_config(&self) -> RetryConfig {
        self.retry.clone().unwrap_or_default()
    }

    pub fn concurrency_limit(&self) -> std::result::Result<NonZeroUsize, ConfigError> {
        NonZeroUsize::new(self.concurrency).ok_or(ConfigError::ZeroConcurrency)
    }

    pub fn backoff_policy(&self) -> std::result::Result<BackoffPolicy, ConfigError> {
        let retry = self.retry_config();
        let initial = seconds("initial_backoff_secs", retry.initial_backoff_secs)?;
        let max = seconds("max_backoff_secs", retry.max_backoff_secs)?;
        if initial > max {
            return Err(ConfigError::InitialExceedsMax { initial, max });
        }
        Ok(BackoffPolicy {
            max_retries: retry.max_retries,
            initial,
            max,
            jitter: retry.jitter,
        })
    }

    /// Check everything the orchestrator needs before it starts.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        self.concurrency_limit()?;
        self.backoff_policy()?;
        Ok(())
    }
}

fn seconds(name: &'static str, value: f64) -> std::result::Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(value).map_err(|_| ConfigError::InvalidInterval { name, value })
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("dlpipe")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<PipelineConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = PipelineConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    load_from_path(&path)
}

/// Load configuration from an explicit path. The file must exist.
pub fn load_from_path(path: &Path) -> Result<PipelineConfig> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let cfg: PipelineConfig =
        toml::from_str(&data).with_context(|| format!("parsing config {}", path.display()))?;
    Ok(cfg)
}

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub collector: CollectorConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    /// Extraction attempts allowed per import before it is marked failed.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Hours to wait after the last completed import before collecting again.
    #[serde(default = "default_grace_period_hours")]
    pub grace_period_hours: u64,
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            grace_period_hours: default_grace_period_hours(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

impl SchedulerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Saturates at [`chrono::TimeDelta::MAX`]; [`validate`] keeps real
    /// configs far below that.
    pub fn grace_period(&self) -> chrono::Duration {
        i64::try_from(self.grace_period_hours)
            .ok()
            .and_then(chrono::Duration::try_hours)
            .unwrap_or(chrono::TimeDelta::MAX)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

const MAX_INTERVAL_SECS: u64 = 30 * 24 * 3600;
const MAX_GRACE_PERIOD_HOURS: u64 = 365 * 24;
const MAX_SHUTDOWN_GRACE_SECS: u64 = 3600;

fn default_interval_secs() -> u64 {
    3600
}
fn default_grace_period_hours() -> u64 {
    12
}
fn default_shutdown_grace_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct CollectorConfig {
    #[serde(default = "default_collector_root")]
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            root: default_collector_root(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        }
    }
}

fn default_collector_root() -> PathBuf {
    PathBuf::from("./images")
}

fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.jpg".to_string(),
        "**/*.jpeg".to_string(),
        "**/*.png".to_string(),
        "**/*.webp".to_string(),
    ]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL of the Messages API; overridable for proxies and tests.
    #[serde(default)]
    pub url: Option<String>,
    /// Replaces the built-in CSV extraction prompt.
    #[serde(default)]
    pub prompt: Option<String>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
            url: None,
            prompt: None,
        }
    }
}

impl ExtractionConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}
fn default_max_tokens() -> u32 {
    20000
}
fn default_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// `tracing` filter directive; `RUST_LOG` takes precedence when set.
    #[serde(default = "default_filter")]
    pub filter: String,
    #[serde(default = "default_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            format: default_format(),
        }
    }
}

fn default_filter() -> String {
    "info".to_string()
}
fn default_format() -> String {
    "compact".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;

    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.pipeline.max_retries == 0 {
        anyhow::bail!("pipeline.max_retries must be >= 1");
    }

    if config.scheduler.interval_secs == 0 {
        anyhow::bail!("scheduler.interval_secs must be >= 1");
    }

    if config.scheduler.interval_secs > MAX_INTERVAL_SECS {
        anyhow::bail!(
            "scheduler.interval_secs must be <= {} (30 days)",
            MAX_INTERVAL_SECS
        );
    }

    if config.scheduler.grace_period_hours > MAX_GRACE_PERIOD_HOURS {
        anyhow::bail!(
            "scheduler.grace_period_hours must be <= {} (one year)",
            MAX_GRACE_PERIOD_HOURS
        );
    }

    if config.scheduler.shutdown_grace_secs > MAX_SHUTDOWN_GRACE_SECS {
        anyhow::bail!(
            "scheduler.shutdown_grace_secs must be <= {}",
            MAX_SHUTDOWN_GRACE_SECS
        );
    }

    match config.extraction.provider.as_str() {
        "disabled" | "anthropic" => {}
        other => anyhow::bail!(
            "Unknown extraction provider: '{}'. Must be disabled or anthropic.",
            other
        ),
    }

    if config.extraction.is_enabled() && config.extraction.max_tokens == 0 {
        anyhow::bail!("extraction.max_tokens must be > 0");
    }

    match config.logging.format.as_str() {
        "compact" | "json" => {}
        other => anyhow::bail!(
            "Unknown logging format: '{}'. Must be compact or json.",
            other
        ),
    }

    Ok(())
}

//! Configuration module for callqa

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::limiter::RateLimitConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Worker configuration
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Default rate limit applied to new campaigns
    #[serde(default)]
    pub rate_limit: RateLimitDefaults,

    /// Audit service endpoint
    #[serde(default)]
    pub audit: AuditServiceConfig,

    /// Report export settings
    #[serde(default)]
    pub report: ReportConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_enabled: true,
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database
    pub path: Option<String>,
}

impl DatabaseConfig {
    pub fn get_path(&self) -> PathBuf {
        if let Some(path) = &self.path {
            PathBuf::from(path)
        } else {
            get_data_dir().join("data.db")
        }
    }
}

/// Worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Seconds between polling passes when no wake signal arrives
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Jobs processed concurrently within one campaign
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Automatic retries for transient failures before a job is failed
    #[serde(default = "default_max_retries")]
    pub max_retries: i32,

    /// Per-call audit timeout in seconds
    #[serde(default = "default_job_timeout")]
    pub job_timeout_secs: u64,

    /// Processing jobs older than this are considered stuck
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: i64,
}

fn default_poll_interval() -> u64 {
    15
}
fn default_concurrency() -> usize {
    4
}
fn default_max_retries() -> i32 {
    3
}
fn default_job_timeout() -> u64 {
    180
}
fn default_stale_after() -> i64 {
    600
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            concurrency: default_concurrency(),
            max_retries: default_max_retries(),
            job_timeout_secs: default_job_timeout(),
            stale_after_secs: default_stale_after(),
        }
    }
}

/// Default rate limit snapshotted onto new campaigns
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitDefaults {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_per_minute")]
    pub requests_per_minute: u32,

    #[serde(default = "default_per_hour")]
    pub requests_per_hour: u32,
}

fn default_per_minute() -> u32 {
    10
}
fn default_per_hour() -> u32 {
    200
}

impl Default for RateLimitDefaults {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_minute: default_per_minute(),
            requests_per_hour: default_per_hour(),
        }
    }
}

impl RateLimitDefaults {
    /// Snapshot for a new campaign, with per-request overrides applied
    pub fn snapshot(
        &self,
        apply: Option<bool>,
        per_minute: Option<u32>,
        per_hour: Option<u32>,
    ) -> RateLimitConfig {
        RateLimitConfig {
            enabled: apply.unwrap_or(self.enabled),
            requests_per_minute: per_minute.unwrap_or(self.requests_per_minute),
            requests_per_hour: per_hour.unwrap_or(self.requests_per_hour),
        }
    }
}

/// Audit service endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditServiceConfig {
    #[serde(default = "default_audit_url")]
    pub base_url: String,

    pub api_key: Option<String>,

    /// HTTP client timeout in seconds
    #[serde(default = "default_audit_timeout")]
    pub timeout_secs: u64,
}

fn default_audit_url() -> String {
    "http://127.0.0.1:8088".to_string()
}

fn default_audit_timeout() -> u64 {
    300
}

impl Default for AuditServiceConfig {
    fn default() -> Self {
        Self {
            base_url: default_audit_url(),
            api_key: None,
            timeout_secs: default_audit_timeout(),
        }
    }
}

/// Report export settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Percentage at or above which a call counts as passed
    #[serde(default = "default_pass_threshold")]
    pub pass_threshold: f64,
}

fn default_pass_threshold() -> f64 {
    80.0
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            pass_threshold: default_pass_threshold(),
        }
    }
}

/// Get the data directory for callqa
pub fn get_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("callqa"))
        .or_else(|| dirs::home_dir().map(|h| h.join(".callqa")))
        .unwrap_or_else(|| PathBuf::from(".callqa"))
}

/// Get the config directory for callqa
pub fn get_config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("callqa"))
        .unwrap_or_else(get_data_dir)
}

/// Load configuration from `CALLQA_CONFIG`, the config dir, or defaults
pub fn load_config() -> AppConfig {
    let config_path = std::env::var_os("CALLQA_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| get_config_dir().join("config.toml"));

    if config_path.exists() {
        if let Ok(contents) = std::fs::read_to_string(&config_path) {
            match toml::from_str(&contents) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!("Ignoring unreadable config {}: {}", config_path.display(), e)
                }
            }
        }
    }

    AppConfig::default()
}

/// Save configuration to file
pub fn save_config(config: &AppConfig) -> std::io::Result<()> {
    let config_dir = get_config_dir();
    std::fs::create_dir_all(&config_dir)?;

    let config_path = config_dir.join("config.toml");
    let contents = toml::to_string_pretty(config).unwrap_or_default();
    std::fs::write(config_path, contents)?;

    Ok(())
}

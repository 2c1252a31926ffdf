use std::collections::BTreeMap;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 8081;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
/// Five minutes per run unless a job sets its own `timeout_secs`.
pub const DEFAULT_JOB_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 16 * 1024;
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 3_600;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_RETENTION_SECS: u64 = 24 * 3_600;

/// Top-level config (cadence.toml + CADENCE_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CadenceConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    /// Static job definitions, loaded once at startup.
    #[serde(default)]
    pub jobs: Vec<JobConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

/// Scheduler loop and run executor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// How often the scheduler loop wakes to look for due jobs.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Directory job scripts are resolved against.
    #[serde(default = "default_script_dir")]
    pub script_dir: String,
    /// Interpreter used to run job scripts (`<shell> <script>`).
    #[serde(default = "default_shell")]
    pub shell: String,
    /// Timeout applied to jobs that do not set their own.
    #[serde(default = "default_job_timeout_secs")]
    pub default_timeout_secs: u64,
    /// Upper bound on captured script output per run; the oldest bytes are
    /// dropped. Truncation and timeout markers are added on top of it.
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
    /// Extra environment exported to every job.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            script_dir: default_script_dir(),
            shell: default_shell(),
            default_timeout_secs: DEFAULT_JOB_TIMEOUT_SECS,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            env: BTreeMap::new(),
        }
    }
}

/// Token broker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// When false, token issuance is refused and the status surface reports
    /// the broker as disabled.
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// How long revoked/expired task records are kept for inspection.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            token_ttl_secs: DEFAULT_TOKEN_TTL_SECS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            retention_secs: DEFAULT_RETENTION_SECS,
        }
    }
}

/// A single `[[jobs]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Stable identifier, used in API paths.
    pub name: String,
    /// Cron expression, 5-field crontab or 6/7-field with seconds.
    pub schedule: String,
    #[serde(default)]
    pub description: String,
    /// Script file name, resolved against `scheduler.script_dir`.
    pub script: String,
    #[serde(default = "bool_true")]
    pub enabled: bool,
    /// Per-job timeout; falls back to `scheduler.default_timeout_secs`.
    pub timeout_secs: Option<u64>,
}

fn bool_true() -> bool {
    true
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}
fn default_script_dir() -> String {
    "/opt/cadence/scripts".to_string()
}
fn default_shell() -> String {
    "bash".to_string()
}
fn default_job_timeout_secs() -> u64 {
    DEFAULT_JOB_TIMEOUT_SECS
}
fn default_max_output_bytes() -> usize {
    DEFAULT_MAX_OUTPUT_BYTES
}
fn default_token_ttl_secs() -> u64 {
    DEFAULT_TOKEN_TTL_SECS
}
fn default_sweep_interval_secs() -> u64 {
    DEFAULT_SWEEP_INTERVAL_SECS
}
fn default_retention_secs() -> u64 {
    DEFAULT_RETENTION_SECS
}

impl CadenceConfig {
    /// Load config from a TOML file with CADENCE_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `CADENCE_SERVER__PORT=9000` or `CADENCE_BROKER__ENABLED=false`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);
        tracing::debug!(path = %path, "loading config");

        let config: CadenceConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("CADENCE_").split("__"))
            .extract()
            .map_err(|e| crate::error::CadenceError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cadence/cadence.toml", home)
}

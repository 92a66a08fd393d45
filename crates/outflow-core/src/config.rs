use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Top-level config (outflow.toml + OUTFLOW_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OutflowConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub vault: VaultConfig,
    #[serde(default)]
    pub workers: WorkerConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Filesystem storage for session material (WhatsApp Web browser profiles).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_root")]
    pub root: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
        }
    }
}

/// Credential vault key material.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct VaultConfig {
    /// 64 hex chars — the 32-byte process-wide AEAD key. Required in
    /// production; the vault constructor rejects anything else.
    #[serde(default)]
    pub key_hex: String,
}

/// Job worker pool tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of general workers leasing jobs of any kind.
    #[serde(default = "default_worker_count")]
    pub count: usize,
    /// Queue polling cadence. Valid range is 5–30 s.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Lease duration granted per batch; heartbeats extend it.
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,
    /// Soft deadline for a single job execution.
    #[serde(default = "default_job_timeout")]
    pub job_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
            poll_interval_secs: default_poll_interval(),
            lease_secs: default_lease_secs(),
            job_timeout_secs: default_job_timeout(),
        }
    }
}

/// Retention for the CLEANUP job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Terminal jobs older than this many days are pruned.
    #[serde(default = "default_completed_job_days")]
    pub completed_job_days: i64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            completed_job_days: default_completed_job_days(),
        }
    }
}

fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.outflow/outflow.db", home)
}

fn default_storage_root() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.outflow/storage", home)
}

fn default_worker_count() -> usize {
    5
}
fn default_poll_interval() -> u64 {
    5
}
fn default_lease_secs() -> u64 {
    60
}
fn default_job_timeout() -> u64 {
    300
}
fn default_completed_job_days() -> i64 {
    7
}

impl OutflowConfig {
    /// Load config from a TOML file with OUTFLOW_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.outflow/outflow.toml
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: OutflowConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("OUTFLOW_").split("_"))
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.outflow/outflow.toml", home)
}

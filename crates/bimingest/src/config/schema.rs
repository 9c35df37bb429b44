use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::geometry::LodPolicy;
use crate::model::StageName;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// SQLite database file. Defaults to `~/.bimingest/data/bimingest.db`.
    #[serde(default)]
    pub database_path: Option<String>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Wall-clock budget for a single job attempt.
    #[serde(default = "default_job_timeout_ms")]
    pub job_timeout_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub retry: RetryConfig,
    /// LOD policy applied to jobs submitted without an explicit one.
    #[serde(default)]
    pub lod: LodPolicy,
    /// Number of elements processed between cancellation checks.
    #[serde(default = "default_cancel_check_interval")]
    pub cancel_check_interval: usize,
    /// Stages whose failure fails the whole job and halts the pipeline.
    #[serde(default = "default_required_stages")]
    pub required_stages: Vec<StageName>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_worker_count() -> usize {
    num_cpus::get().clamp(1, 4)
}

fn default_poll_interval_ms() -> u64 {
    250
}

fn default_job_timeout_ms() -> u64 {
    600_000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_cancel_check_interval() -> usize {
    64
}

pub(crate) fn default_required_stages() -> Vec<StageName> {
    vec![
        StageName::SpatialHierarchy,
        StageName::Types,
        StageName::ElementsAndGeometry,
    ]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            worker_count: default_worker_count(),
            database_path: None,
            poll_interval_ms: default_poll_interval_ms(),
            job_timeout_ms: default_job_timeout_ms(),
            max_attempts: default_max_attempts(),
            retry: RetryConfig::default(),
            lod: LodPolicy::default(),
            cancel_check_interval: default_cancel_check_interval(),
            required_stages: default_required_stages(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    pub fn job_timeout(&self) -> Duration {
        Duration::from_millis(self.job_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// The configured database path, falling back to the per-user default.
    pub fn resolved_database_path(&self) -> Option<PathBuf> {
        match &self.database_path {
            Some(path) => Some(PathBuf::from(path)),
            None => crate::db::default_database_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_jitter_ms() -> u64 {
    500
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default)]
    pub filter: Option<String>,
}

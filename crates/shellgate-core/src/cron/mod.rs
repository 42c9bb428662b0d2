//! Persistent cron scheduling.
//!
//! Jobs live in the key-value store under `cron/jobs/{id}.json` and are
//! mirrored in an in-memory cache; the scheduler owns one timer per job and
//! executes with a concurrency cap, an overall timeout, and bounded retry
//! backoff.

pub mod scheduler;
pub mod store;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

pub use scheduler::{AgentInvoker, CronScheduler};
pub use store::CronJobStore;

/// Scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronConfig {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_execution_timeout_secs")]
    pub execution_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_max_concurrent() -> usize {
    5
}

fn default_execution_timeout_secs() -> u64 {
    300
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    30_000
}

impl Default for CronConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            execution_timeout_secs: default_execution_timeout_secs(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

/// Aggregates for the dashboard.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CronStats {
    #[ts(type = "number")]
    pub total_jobs: usize,
    #[ts(type = "number")]
    pub enabled_jobs: usize,
    #[ts(type = "number")]
    pub scheduled_jobs: usize,
    #[ts(type = "number")]
    pub total_executions: u64,
    #[ts(type = "number")]
    pub total_failures: u64,
    #[ts(type = "number")]
    pub active_executions: usize,
}

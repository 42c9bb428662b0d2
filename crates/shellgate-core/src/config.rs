//! Gateway configuration.
//!
//! Deserialized from JSON at process start; every field carries a default so
//! an empty document yields a working configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::cron::CronConfig;
use crate::models::{DetectionConfig, Sensitivity};
use crate::ratelimit::RateLimiterConfig;

/// Environment variable consulted when no sandbox API key is configured.
pub const SANDBOX_API_KEY_ENV: &str = "SHELLGATE_SANDBOX_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Minutes of inactivity before a sandbox is hibernated.
    #[serde(default = "default_sandbox_idle_minutes")]
    pub sandbox_idle_minutes: u64,

    /// Provider credential; falls back to [`SANDBOX_API_KEY_ENV`].
    #[serde(default)]
    pub sandbox_api_key: Option<String>,

    /// Rate limiting is off when absent.
    #[serde(default)]
    pub rate_limit: Option<RateLimiterConfig>,

    #[serde(default = "default_approval_timeout_secs")]
    pub approval_timeout_secs: u64,

    #[serde(default)]
    pub cron: CronConfig,

    #[serde(default)]
    pub secrets: DetectionConfig,

    #[serde(default)]
    pub injection_sensitivity: Sensitivity,
}

fn default_sandbox_idle_minutes() -> u64 {
    50
}

fn default_approval_timeout_secs() -> u64 {
    300
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            sandbox_idle_minutes: default_sandbox_idle_minutes(),
            sandbox_api_key: None,
            rate_limit: None,
            approval_timeout_secs: default_approval_timeout_secs(),
            cron: CronConfig::default(),
            secrets: DetectionConfig::default(),
            injection_sensitivity: Sensitivity::default(),
        }
    }
}

impl GatewayConfig {
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    pub fn sandbox_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.sandbox_idle_minutes * 60)
    }

    pub fn approval_timeout(&self) -> Duration {
        Duration::from_secs(self.approval_timeout_secs)
    }

    /// Configured key, or the environment fallback.
    pub fn resolve_sandbox_api_key(&self) -> Option<String> {
        self.sandbox_api_key
            .clone()
            .or_else(|| std::env::var(SANDBOX_API_KEY_ENV).ok())
    }
}

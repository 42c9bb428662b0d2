//! Scheduled job model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// A persisted scheduled job.
///
/// Serialized as JSON under `cron/jobs/{id}.json` with ISO-8601 timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CronJob {
    pub id: String,
    pub user_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub cron_expression: String,
    /// Dispatched on shape: `http(s)://` targets, `agent:` invocations, or a
    /// whitelisted shell command.
    pub command: String,
    pub channel_id: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(type = "string | null")]
    pub last_executed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(type = "string | null")]
    pub next_execution_at: Option<DateTime<Utc>>,
    #[serde(default)]
    #[ts(type = "number")]
    pub execution_count: u64,
    #[serde(default)]
    pub failure_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// IANA timezone name; UTC when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

fn default_enabled() -> bool {
    true
}

impl CronJob {
    pub fn new(
        user_id: impl Into<String>,
        name: impl Into<String>,
        cron_expression: impl Into<String>,
        command: impl Into<String>,
        channel_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            name: name.into(),
            description: None,
            cron_expression: cron_expression.into(),
            command: command.into(),
            channel_id: channel_id.into(),
            enabled: true,
            created_at: now,
            updated_at: now,
            last_executed_at: None,
            next_execution_at: None,
            execution_count: 0,
            failure_count: 0,
            last_error: None,
            timezone: None,
        }
    }

    /// Refresh the modification timestamp.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

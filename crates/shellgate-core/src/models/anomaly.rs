//! Behavioral baseline models for the anomaly detector.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use ts_rs::TS;

/// Hours of the day (0-23) a user is normally active, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TypicalHours {
    pub start: u32,
    pub end: u32,
}

impl TypicalHours {
    pub fn contains(&self, hour: u32) -> bool {
        hour >= self.start && hour <= self.end
    }
}

/// Learned behavioral baseline for one user.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct UserBaseline {
    pub user_id: String,
    pub avg_commands_per_hour: f64,
    /// Head token of each command mapped to how often it was seen.
    #[ts(type = "Record<string, number>")]
    pub command_frequency: HashMap<String, u64>,
    pub typical_hours: TypicalHours,
    #[ts(type = "string")]
    pub last_updated: DateTime<Utc>,
}

/// Outcome of scoring one command against the user's baseline.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct AnomalyReport {
    pub is_anomaly: bool,
    /// 0.0 (normal) to 1.0 (maximally anomalous).
    pub score: f64,
    /// Human-readable contributions, one per triggered factor.
    pub factors: Vec<String>,
    pub recommendation: AnomalyRecommendation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum AnomalyRecommendation {
    Allow,
    Flag,
    Block,
}

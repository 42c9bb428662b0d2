//! Behavioral anomaly detection.
//!
//! Tracks a bounded history of recent commands per user and a learned
//! baseline (commands per hour, head-token frequency, typical active hours).
//! Each analyzed command is scored against the baseline; the orchestrator
//! uses the score to escalate a command's tier after classification. The
//! clock is injectable so tests control time-of-day and window math.

use chrono::{DateTime, Timelike, Utc};
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;

use crate::models::{AnomalyRecommendation, AnomalyReport, TypicalHours, UserBaseline};

/// Entries kept per user.
const MAX_RECENT: usize = 100;
/// Baselines are recomputed only once this much history exists.
const MIN_BASELINE_SAMPLES: usize = 10;

const WEIGHT_FREQUENCY_SPIKE: f64 = 0.30;
const WEIGHT_OFF_HOURS: f64 = 0.20;
const WEIGHT_NOVEL_COMMAND: f64 = 0.20;
const WEIGHT_RAPID_SUCCESSION: f64 = 0.15;

const ANOMALY_THRESHOLD: f64 = 0.5;
const BLOCK_THRESHOLD: f64 = 0.7;

#[derive(Debug, Clone)]
struct RecentCommand {
    command: String,
    at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct UserActivity {
    baseline: Option<UserBaseline>,
    recent: VecDeque<RecentCommand>,
}

/// Clock used for scoring; swapped out in tests.
type ClockFn = dyn Fn() -> DateTime<Utc> + Send + Sync;

/// Per-user behavioral detector. One internal lock; shared behind an `Arc`.
pub struct AnomalyDetector {
    users: RwLock<HashMap<String, UserActivity>>,
    now_fn: Box<ClockFn>,
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl AnomalyDetector {
    pub fn new() -> Self {
        Self::with_clock(Box::new(Utc::now))
    }

    /// Build a detector with an injected clock.
    pub fn with_clock(now_fn: Box<ClockFn>) -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            now_fn,
        }
    }

    fn now(&self) -> DateTime<Utc> {
        (self.now_fn)()
    }

    /// Score `command` against the user's baseline and record it.
    pub async fn analyze(&self, user_id: &str, command: &str) -> AnomalyReport {
        self.analyze_at(user_id, command, self.now()).await
    }

    async fn analyze_at(
        &self,
        user_id: &str,
        command: &str,
        now: DateTime<Utc>,
    ) -> AnomalyReport {
        let mut users = self.users.write().await;
        let activity = users.entry(user_id.to_string()).or_default();

        let mut score = 0.0;
        let mut factors = Vec::new();

        let hour_ago = now - chrono::Duration::hours(1);
        let recent_in_hour = activity
            .recent
            .iter()
            .filter(|entry| entry.at > hour_ago)
            .count() as f64;

        if let Some(baseline) = &activity.baseline {
            if baseline.avg_commands_per_hour > 0.0
                && recent_in_hour > baseline.avg_commands_per_hour * 3.0
            {
                score += WEIGHT_FREQUENCY_SPIKE;
                factors.push(format!(
                    "frequency spike: {recent_in_hour} commands in the last hour vs baseline {:.1}",
                    baseline.avg_commands_per_hour
                ));
            }

            if !baseline.typical_hours.contains(now.hour()) {
                score += WEIGHT_OFF_HOURS;
                factors.push(format!(
                    "off-hours activity: hour {} outside {}-{}",
                    now.hour(),
                    baseline.typical_hours.start,
                    baseline.typical_hours.end
                ));
            }

            let head = head_token(command);
            if !head.is_empty() && !baseline.command_frequency.contains_key(head) {
                score += WEIGHT_NOVEL_COMMAND;
                factors.push(format!("novel command: {head}"));
            }
        }

        if let Some(last) = activity.recent.back()
            && (now - last.at) < chrono::Duration::seconds(1)
        {
            score += WEIGHT_RAPID_SUCCESSION;
            factors.push("rapid succession: previous command under 1s ago".to_string());
        }

        activity.recent.push_back(RecentCommand {
            command: command.to_string(),
            at: now,
        });
        while activity.recent.len() > MAX_RECENT {
            activity.recent.pop_front();
        }

        let recommendation = if score >= BLOCK_THRESHOLD {
            AnomalyRecommendation::Block
        } else if score >= ANOMALY_THRESHOLD {
            AnomalyRecommendation::Flag
        } else {
            AnomalyRecommendation::Allow
        };

        AnomalyReport {
            is_anomaly: score >= ANOMALY_THRESHOLD,
            score,
            factors,
            recommendation,
        }
    }

    /// Recompute the user's baseline from stored history.
    ///
    /// Returns the current baseline, unchanged when fewer than
    /// [`MIN_BASELINE_SAMPLES`] entries exist.
    pub async fn update_baseline(&self, user_id: &str) -> Option<UserBaseline> {
        self.update_baseline_at(user_id, self.now()).await
    }

    async fn update_baseline_at(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Option<UserBaseline> {
        let mut users = self.users.write().await;
        let activity = users.entry(user_id.to_string()).or_default();

        if activity.recent.len() < MIN_BASELINE_SAMPLES {
            return activity.baseline.clone();
        }

        let hour_ago = now - chrono::Duration::hours(1);
        let avg_commands_per_hour = activity
            .recent
            .iter()
            .filter(|entry| entry.at > hour_ago)
            .count() as f64;

        let mut command_frequency: HashMap<String, u64> = HashMap::new();
        let mut min_hour = 23u32;
        let mut max_hour = 0u32;
        for entry in &activity.recent {
            let head = head_token(&entry.command);
            if !head.is_empty() {
                *command_frequency.entry(head.to_string()).or_default() += 1;
            }
            let hour = entry.at.hour();
            min_hour = min_hour.min(hour);
            max_hour = max_hour.max(hour);
        }

        let baseline = UserBaseline {
            user_id: user_id.to_string(),
            avg_commands_per_hour,
            command_frequency,
            typical_hours: TypicalHours {
                start: min_hour,
                end: max_hour,
            },
            last_updated: now,
        };

        activity.baseline = Some(baseline.clone());
        Some(baseline)
    }

    pub async fn get_baseline(&self, user_id: &str) -> Option<UserBaseline> {
        let users = self.users.read().await;
        users.get(user_id).and_then(|a| a.baseline.clone())
    }

    /// Install a baseline directly; used by imports and tests.
    pub async fn set_baseline(&self, baseline: UserBaseline) {
        let mut users = self.users.write().await;
        let user_id = baseline.user_id.clone();
        users.entry(user_id).or_default().baseline = Some(baseline);
    }
}

fn head_token(command: &str) -> &str {
    command.split_whitespace().next().unwrap_or("")
}

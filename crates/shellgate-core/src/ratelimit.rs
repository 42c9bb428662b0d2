//! Per-subject rate limiting.
//!
//! Fixed-window buckets keyed by user (or user+channel when per-channel mode
//! is on). Everything is a pure function of in-memory state and the clock,
//! so checks complete in bounded time and there is no failure mode.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::models::RateDecision;

/// Limiter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
    /// Key buckets by `user_id:channel_id` instead of `user_id`.
    #[serde(default)]
    pub per_channel: bool,
}

fn default_window_ms() -> u64 {
    60_000
}

fn default_max_requests() -> u32 {
    10
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
            max_requests: default_max_requests(),
            per_channel: false,
        }
    }
}

#[derive(Debug, Clone)]
struct RateBucket {
    count: u32,
    reset_at: DateTime<Utc>,
}

/// The limiter. One internal lock; safe to share behind an `Arc`.
pub struct RateLimiter {
    config: RateLimiterConfig,
    buckets: Mutex<HashMap<String, RateBucket>>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    fn subject_key(&self, user_id: &str, channel_id: Option<&str>) -> String {
        match (self.config.per_channel, channel_id) {
            (true, Some(channel)) => format!("{user_id}:{channel}"),
            _ => user_id.to_string(),
        }
    }

    /// Count one request against the subject's bucket.
    pub fn check(&self, user_id: &str, channel_id: Option<&str>) -> RateDecision {
        let key = self.subject_key(user_id, channel_id);
        let now = Utc::now();
        let window = Duration::milliseconds(self.config.window_ms as i64);

        let mut buckets = self.buckets.lock().expect("rate bucket lock");
        let bucket = buckets.entry(key).or_insert_with(|| RateBucket {
            count: 0,
            reset_at: now + window,
        });

        // Stale window: start fresh before counting this request.
        if bucket.reset_at <= now {
            bucket.count = 0;
            bucket.reset_at = now + window;
        }

        if bucket.count >= self.config.max_requests {
            let retry_after_ms = (bucket.reset_at - now).num_milliseconds().max(0);
            return RateDecision {
                allowed: false,
                remaining: 0,
                reset_at: bucket.reset_at,
                retry_after_ms: Some(retry_after_ms),
            };
        }

        bucket.count += 1;
        RateDecision {
            allowed: true,
            remaining: self.config.max_requests - bucket.count,
            reset_at: bucket.reset_at,
            retry_after_ms: None,
        }
    }

    /// Snapshot without counting a request.
    pub fn status(&self, user_id: &str, channel_id: Option<&str>) -> RateDecision {
        let key = self.subject_key(user_id, channel_id);
        let now = Utc::now();

        let buckets = self.buckets.lock().expect("rate bucket lock");
        match buckets.get(&key) {
            Some(bucket) if bucket.reset_at > now => RateDecision {
                allowed: bucket.count < self.config.max_requests,
                remaining: self.config.max_requests.saturating_sub(bucket.count),
                reset_at: bucket.reset_at,
                retry_after_ms: (bucket.count >= self.config.max_requests)
                    .then(|| (bucket.reset_at - now).num_milliseconds().max(0)),
            },
            _ => RateDecision {
                allowed: true,
                remaining: self.config.max_requests,
                reset_at: now + Duration::milliseconds(self.config.window_ms as i64),
                retry_after_ms: None,
            },
        }
    }

    /// Drop every bucket belonging to `user_id`, across all channels.
    pub fn reset(&self, user_id: &str) {
        let mut buckets = self.buckets.lock().expect("rate bucket lock");
        buckets.retain(|key, _| !key.starts_with(user_id));
    }
}

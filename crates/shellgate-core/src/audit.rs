//! In-process audit log.
//!
//! A newest-first ring bounded at [`MAX_ENTRIES`]: inserts never block the
//! producer, the oldest entry is evicted on overflow, and statistics are
//! pure functions of current contents. Hooks reference entries by id and
//! mutate them through [`AuditLog::update`], never through shared
//! references.

use chrono::{Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::error::{GatewayError, Result};
use crate::models::{AuditEntry, AuditPatch, AuditQuery, AuditStats, CommandTier, PolicyAction};

/// Ring capacity.
pub const MAX_ENTRIES: usize = 10_000;

/// The audit log. One internal lock; shared behind an `Arc`.
pub struct AuditLog {
    entries: Mutex<VecDeque<AuditEntry>>,
    max_entries: usize,
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditLog {
    pub fn new() -> Self {
        Self::with_capacity(MAX_ENTRIES)
    }

    pub fn with_capacity(max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            max_entries,
        }
    }

    /// Insert a new entry at the front, evicting the oldest on overflow.
    pub fn create(
        &self,
        command: &str,
        tier: CommandTier,
        action: PolicyAction,
        reason: &str,
        user_id: &str,
        channel_id: &str,
    ) -> AuditEntry {
        let entry = AuditEntry::new(command, tier, action, reason, user_id, channel_id);

        let mut entries = self.entries.lock().expect("audit lock");
        entries.push_front(entry.clone());
        while entries.len() > self.max_entries {
            entries.pop_back();
        }

        entry
    }

    /// Apply a partial update to an existing entry.
    pub fn update(&self, id: &str, patch: AuditPatch) -> Result<AuditEntry> {
        let mut entries = self.entries.lock().expect("audit lock");
        let entry = entries
            .iter_mut()
            .find(|entry| entry.id == id)
            .ok_or_else(|| GatewayError::NotFound("Audit entry".to_string()))?;

        if let Some(approved) = patch.approved {
            entry.approved = Some(approved);
        }
        if let Some(approved_by) = patch.approved_by {
            entry.approved_by = Some(approved_by);
        }
        if let Some(approved_at) = patch.approved_at {
            entry.approved_at = Some(approved_at);
        }
        if let Some(executed_at) = patch.executed_at {
            entry.executed_at = Some(executed_at);
        }
        if let Some(output) = patch.output {
            entry.output = Some(output);
        }
        if let Some(error) = patch.error {
            entry.error = Some(error);
        }
        if let Some(secrets_found) = patch.secrets_found {
            entry.secrets_found = Some(secrets_found);
        }
        if let Some(secrets_redacted) = patch.secrets_redacted {
            entry.secrets_redacted = secrets_redacted;
        }

        Ok(entry.clone())
    }

    pub fn get(&self, id: &str) -> Option<AuditEntry> {
        let entries = self.entries.lock().expect("audit lock");
        entries.iter().find(|entry| entry.id == id).cloned()
    }

    /// Newest-first query with filters applied in declared order.
    pub fn query(&self, user_id: Option<&str>, query: &AuditQuery) -> Vec<AuditEntry> {
        let entries = self.entries.lock().expect("audit lock");
        entries
            .iter()
            .filter(|entry| user_id.is_none_or(|user| entry.user_id == user))
            .filter(|entry| query.tier.is_none_or(|tier| entry.tier == tier))
            .filter(|entry| query.action.is_none_or(|action| entry.action == action))
            .filter(|entry| query.from.is_none_or(|from| entry.created_at >= from))
            .filter(|entry| query.to.is_none_or(|to| entry.created_at <= to))
            .skip(query.offset)
            .take(query.limit)
            .cloned()
            .collect()
    }

    /// Total entries matching the user filter, ignoring pagination.
    pub fn count(&self, user_id: Option<&str>) -> usize {
        let entries = self.entries.lock().expect("audit lock");
        entries
            .iter()
            .filter(|entry| user_id.is_none_or(|user| entry.user_id == user))
            .count()
    }

    /// Aggregate statistics over the last `days` days.
    pub fn stats(&self, user_id: Option<&str>, days: i64) -> AuditStats {
        let cutoff = Utc::now() - Duration::days(days);
        let entries = self.entries.lock().expect("audit lock");

        let mut by_tier: HashMap<String, usize> = HashMap::new();
        let mut by_action: HashMap<String, usize> = HashMap::new();
        let mut total = 0usize;
        let mut total_ask = 0usize;
        let mut approved_ask = 0usize;

        for entry in entries.iter() {
            if entry.created_at < cutoff {
                continue;
            }
            if let Some(user) = user_id
                && entry.user_id != user
            {
                continue;
            }

            total += 1;
            *by_tier.entry(entry.tier.as_str().to_string()).or_default() += 1;
            *by_action.entry(entry.action.as_str().to_string()).or_default() += 1;

            if entry.action == PolicyAction::Ask {
                total_ask += 1;
                if entry.approved == Some(true) {
                    approved_ask += 1;
                }
            }
        }

        let approval_rate = if total_ask > 0 {
            approved_ask as f64 / total_ask as f64
        } else {
            0.0
        };

        AuditStats {
            total,
            by_tier,
            by_action,
            approval_rate,
            last_update: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log() -> AuditLog {
        AuditLog::new()
    }

    fn create_n(log: &AuditLog, n: usize, user: &str) -> Vec<String> {
        (0..n)
            .map(|i| {
                log.create(
                    &format!("cmd {i}"),
                    CommandTier::Green,
                    PolicyAction::Allow,
                    "safe",
                    user,
                    "c1",
                )
                .id
            })
            .collect()
    }

    #[test]
    fn test_create_returns_entry_with_id() {
        let log = log();
        let entry = log.create("ls", CommandTier::Green, PolicyAction::Allow, "safe", "u1", "c1");
        assert!(!entry.id.is_empty());
        assert_eq!(log.count(None), 1);
    }

    #[test]
    fn test_newest_first_ordering() {
        let log = log();
        create_n(&log, 3, "u1");
        let entries = log.query(None, &AuditQuery::default());
        assert_eq!(entries[0].command, "cmd 2");
        assert_eq!(entries[2].command, "cmd 0");
    }

    #[test]
    fn test_overflow_evicts_oldest() {
        let log = AuditLog::with_capacity(5);
        create_n(&log, 8, "u1");
        assert_eq!(log.count(None), 5);

        let entries = log.query(None, &AuditQuery::default());
        assert_eq!(entries[0].command, "cmd 7");
        assert_eq!(entries[4].command, "cmd 3");
    }

    #[test]
    fn test_update_patches_fields() {
        let log = log();
        let entry = log.create("rm x", CommandTier::Yellow, PolicyAction::Ask, "risky", "u1", "c1");

        let updated = log
            .update(
                &entry.id,
                AuditPatch {
                    approved: Some(true),
                    approved_by: Some("admin".to_string()),
                    approved_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(updated.approved, Some(true));
        assert_eq!(updated.approved_by.as_deref(), Some("admin"));
        assert!(updated.created_at <= updated.approved_at.unwrap());
    }

    #[test]
    fn test_update_unknown_id_fails() {
        let log = log();
        let result = log.update("missing", AuditPatch::default());
        assert!(matches!(result, Err(GatewayError::NotFound(_))));
    }

    #[test]
    fn test_query_by_user() {
        let log = log();
        create_n(&log, 3, "u1");
        create_n(&log, 2, "u2");

        assert_eq!(log.query(Some("u1"), &AuditQuery::default()).len(), 3);
        assert_eq!(log.query(Some("u2"), &AuditQuery::default()).len(), 2);
        assert_eq!(log.query(Some("nobody"), &AuditQuery::default()).len(), 0);
    }

    #[test]
    fn test_query_by_tier_and_action() {
        let log = log();
        log.create("ls", CommandTier::Green, PolicyAction::Allow, "safe", "u1", "c1");
        log.create("rm x", CommandTier::Yellow, PolicyAction::Ask, "risky", "u1", "c1");
        log.create("rm -rf /", CommandTier::Red, PolicyAction::Block, "dangerous", "u1", "c1");

        let query = AuditQuery {
            tier: Some(CommandTier::Red),
            ..Default::default()
        };
        assert_eq!(log.query(None, &query).len(), 1);

        let query = AuditQuery {
            action: Some(PolicyAction::Ask),
            ..Default::default()
        };
        assert_eq!(log.query(None, &query)[0].command, "rm x");
    }

    #[test]
    fn test_query_pagination() {
        let log = log();
        create_n(&log, 10, "u1");

        let query = AuditQuery {
            limit: 3,
            offset: 2,
            ..Default::default()
        };
        let page = log.query(None, &query);
        assert_eq!(page.len(), 3);
        assert_eq!(page[0].command, "cmd 7");
    }

    #[test]
    fn test_stats_counts_and_rate() {
        let log = log();
        log.create("ls", CommandTier::Green, PolicyAction::Allow, "safe", "u1", "c1");
        let ask1 = log.create("rm a", CommandTier::Yellow, PolicyAction::Ask, "risky", "u1", "c1");
        log.create("rm b", CommandTier::Yellow, PolicyAction::Ask, "risky", "u1", "c1");
        log.create("rm -rf /", CommandTier::Red, PolicyAction::Block, "bad", "u1", "c1");

        log.update(
            &ask1.id,
            AuditPatch {
                approved: Some(true),
                ..Default::default()
            },
        )
        .unwrap();

        let stats = log.stats(None, 7);
        assert_eq!(stats.total, 4);
        assert_eq!(stats.by_tier["green"], 1);
        assert_eq!(stats.by_tier["yellow"], 2);
        assert_eq!(stats.by_action["block"], 1);
        assert_eq!(stats.approval_rate, 0.5);
    }

    #[test]
    fn test_stats_zero_asks_zero_rate() {
        let log = log();
        log.create("ls", CommandTier::Green, PolicyAction::Allow, "safe", "u1", "c1");
        let stats = log.stats(None, 7);
        assert_eq!(stats.approval_rate, 0.0);
    }

    #[test]
    fn test_stats_filters_by_user() {
        let log = log();
        create_n(&log, 3, "u1");
        create_n(&log, 1, "u2");
        assert_eq!(log.stats(Some("u1"), 7).total, 3);
        assert_eq!(log.stats(Some("u2"), 7).total, 1);
    }
}

//! Audit trail models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use ts_rs::TS;

use super::classification::{CommandTier, PolicyAction};
use super::secrets::SecretMatch;

/// One security decision and its eventual outcome.
///
/// Entries are created when a command is classified and updated as the call
/// progresses (approval, execution, output scrubbing). Timestamps are only
/// ever appended, so `created_at <= approved_at <= executed_at` holds
/// whenever the later fields are present.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct AuditEntry {
    pub id: String,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    pub user_id: String,
    pub channel_id: String,
    /// Full command text as received.
    pub command: String,
    pub tier: CommandTier,
    pub action: PolicyAction,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(type = "string | null")]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(type = "string | null")]
    pub executed_at: Option<DateTime<Utc>>,
    /// Command output, truncated to 4096 bytes and possibly redacted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secrets_found: Option<Vec<SecretMatch>>,
    #[serde(default)]
    pub secrets_redacted: bool,
}

impl AuditEntry {
    pub fn new(
        command: impl Into<String>,
        tier: CommandTier,
        action: PolicyAction,
        reason: impl Into<String>,
        user_id: impl Into<String>,
        channel_id: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            user_id: user_id.into(),
            channel_id: channel_id.into(),
            command: command.into(),
            tier,
            action,
            reason: reason.into(),
            approved: None,
            approved_by: None,
            approved_at: None,
            executed_at: None,
            output: None,
            error: None,
            secrets_found: None,
            secrets_redacted: false,
        }
    }
}

/// Partial update applied to an existing audit entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditPatch {
    #[serde(default)]
    pub approved: Option<bool>,
    #[serde(default)]
    pub approved_by: Option<String>,
    #[serde(default)]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub executed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub secrets_found: Option<Vec<SecretMatch>>,
    #[serde(default)]
    pub secrets_redacted: Option<bool>,
}

/// Filters for querying the audit log. Applied in declared order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditQuery {
    #[serde(default)]
    pub tier: Option<CommandTier>,
    #[serde(default)]
    pub action: Option<PolicyAction>,
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    50
}

impl Default for AuditQuery {
    fn default() -> Self {
        Self {
            tier: None,
            action: None,
            from: None,
            to: None,
            limit: default_limit(),
            offset: 0,
        }
    }
}

/// Aggregate statistics derived from current audit log contents.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct AuditStats {
    #[ts(type = "number")]
    pub total: usize,
    #[ts(type = "Record<string, number>")]
    pub by_tier: HashMap<String, usize>,
    #[ts(type = "Record<string, number>")]
    pub by_action: HashMap<String, usize>,
    /// approved asks / total asks; 0 when no asks occurred.
    pub approval_rate: f64,
    #[ts(type = "string")]
    pub last_update: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_entry_defaults() {
        let e = AuditEntry::new(
            "ls",
            CommandTier::Green,
            PolicyAction::Allow,
            "safe",
            "u1",
            "c1",
        );
        assert!(!e.id.is_empty());
        assert!(e.approved.is_none());
        assert!(e.output.is_none());
        assert!(!e.secrets_redacted);
    }

    #[test]
    fn test_query_default_limit() {
        let q = AuditQuery::default();
        assert_eq!(q.limit, 50);
        assert_eq!(q.offset, 0);
    }

    #[test]
    fn test_entry_serialization_skips_empty_optionals() {
        let e = AuditEntry::new(
            "ls",
            CommandTier::Green,
            PolicyAction::Allow,
            "safe",
            "u1",
            "c1",
        );
        let json = serde_json::to_value(&e).unwrap();
        assert!(json.get("approved_by").is_none());
        assert_eq!(json["tier"], "green");
    }

    #[test]
    fn test_query_deserializes_with_defaults() {
        let q: AuditQuery = serde_json::from_str("{}").unwrap();
        assert_eq!(q.limit, 50);
        assert!(q.tier.is_none());
    }
}

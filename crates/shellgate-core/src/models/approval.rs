//! Approval request models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use super::classification::CommandTier;

/// A command awaiting a human decision.
///
/// Requests are in exactly one state and every transition out of `Pending`
/// is terminal.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ApprovalRequest {
    pub id: String,
    pub command: String,
    /// Only yellow and red commands ever reach the waiter.
    pub tier: CommandTier,
    pub reason: String,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub expires_at: DateTime<Utc>,
    pub requester_id: String,
}

impl ApprovalRequest {
    pub fn new(
        command: impl Into<String>,
        tier: CommandTier,
        reason: impl Into<String>,
        requester_id: impl Into<String>,
        timeout_secs: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            command: command.into(),
            tier,
            reason: reason.into(),
            created_at: now,
            expires_at: now + chrono::Duration::seconds(timeout_secs as i64),
            requester_id: requester_id.into(),
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

/// Terminal state of an approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, Default)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
    Expired,
}

/// Successful resolution delivered to the waiting requester.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ApprovalGrant {
    pub approved: bool,
    pub approved_by: String,
    #[ts(type = "string")]
    pub timestamp: DateTime<Utc>,
}

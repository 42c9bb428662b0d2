//! Command classification models.
//!
//! Tier and action are deliberately distinct: the tier is the coarse risk
//! label reported to dashboards, while the action is the pipeline decision.
//! Anomaly escalation or custom rules may override the action while leaving
//! the tier intact for reporting.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Coarse risk label for a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum CommandTier {
    Green,
    Yellow,
    Red,
}

impl CommandTier {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Green => "green",
            Self::Yellow => "yellow",
            Self::Red => "red",
        }
    }
}

/// Pipeline decision for a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum PolicyAction {
    Allow,
    Ask,
    Block,
}

impl PolicyAction {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Ask => "ask",
            Self::Block => "block",
        }
    }
}

/// Result of classifying one command.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Classification {
    pub command: String,
    pub tier: CommandTier,
    pub action: PolicyAction,
    pub reason: String,
    /// Source of the rule that decided the outcome, when one matched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_pattern: Option<String>,
    pub requires_approval: bool,
}

impl Classification {
    pub fn new(
        command: impl Into<String>,
        tier: CommandTier,
        action: PolicyAction,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            command: command.into(),
            tier,
            action,
            reason: reason.into(),
            matched_pattern: None,
            requires_approval: matches!(action, PolicyAction::Ask),
        }
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.matched_pattern = Some(pattern.into());
        self
    }
}

/// Per-caller rule overrides layered on top of the built-in pattern store.
///
/// The blocked lists always win over the allowed lists.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CustomRuleSet {
    /// Regexes for commands that are always allowed.
    #[serde(default)]
    pub allowed_commands: Vec<String>,
    /// Regexes for commands that are always blocked.
    #[serde(default)]
    pub blocked_commands: Vec<String>,
    /// FQDNs the command may not reach (suffix-matched).
    #[serde(default)]
    pub blocked_domains: Vec<String>,
    /// When non-empty, every extracted domain must match one of these.
    #[serde(default)]
    pub allowed_domains: Vec<String>,
    /// Regexes for commands approved without asking.
    #[serde(default)]
    pub auto_approve_patterns: Vec<String>,
}

impl CustomRuleSet {
    pub fn is_empty(&self) -> bool {
        self.allowed_commands.is_empty()
            && self.blocked_commands.is_empty()
            && self.blocked_domains.is_empty()
            && self.allowed_domains.is_empty()
            && self.auto_approve_patterns.is_empty()
    }
}

//! Data models shared across the gateway.
//!
//! Everything here is serde-serializable; models consumed by the web
//! dashboard additionally export TypeScript bindings via `ts-rs`.

pub mod anomaly;
pub mod approval;
pub mod audit;
pub mod classification;
pub mod cron;
pub mod hook;
pub mod injection;
pub mod rate_limit;
pub mod secrets;

pub use anomaly::{AnomalyRecommendation, AnomalyReport, TypicalHours, UserBaseline};
pub use approval::{ApprovalGrant, ApprovalRequest, ApprovalStatus};
pub use audit::{AuditEntry, AuditPatch, AuditQuery, AuditStats};
pub use classification::{Classification, CommandTier, CustomRuleSet, PolicyAction};
pub use cron::CronJob;
pub use hook::{HookContext, HookOutcome, ToolCallEvent};
pub use injection::{InjectionPatternMatch, InjectionReport, InjectionSeverity, Sensitivity};
pub use rate_limit::RateDecision;
pub use secrets::{DetectionConfig, DetectionMode, ScanReport, SecretMatch};

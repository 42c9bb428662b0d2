//! Security orchestrator.
//!
//! Sequences the policy pipeline for every shell tool call: authorize,
//! injection-scan, rate-limit, classify, anomaly-escalate, audit, then
//! branch into block / ask / allow. Runs as the highest-priority before and
//! after subscribers on the hook pipeline. All user-visible block strings
//! are stable constants so dashboards can match on them.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::anomaly::AnomalyDetector;
use crate::audit::AuditLog;
use crate::classifier::CommandClassifier;
use crate::hooks::{AfterHook, BeforeHook, HookPipeline};
use crate::injection::InjectionDetector;
use crate::models::{
    AuditPatch, Classification, CommandTier, CustomRuleSet, HookContext, HookOutcome,
    PolicyAction, ToolCallEvent,
};
use crate::ratelimit::RateLimiter;
use crate::secrets::SecretsScanner;

/// Tool name the orchestrator intercepts.
pub const SHELL_TOOL_NAME: &str = "Shell";

/// Priority of the security hooks; they run before anything else.
pub const SECURITY_HOOK_PRIORITY: i32 = 100;

/// Parameter keys merged into passed-through calls.
pub const AUDIT_ID_KEY: &str = "_audit_id";
pub const TIER_KEY: &str = "_tier";
pub const REASON_KEY: &str = "_reason";

const UNKNOWN_IDENTITY: &str = "unknown";
const MAX_AUDIT_OUTPUT_BYTES: usize = 4_096;

const AUTHZ_DENIED_REASON: &str = "Security blocked: You are not authorized to execute commands";
const AUTHZ_DENIED_AUDIT: &str = "User not authorized for command execution";
const AUTHZ_ERROR_REASON: &str = "Security blocked: Authorization check failed";
const OUTPUT_BLOCKED_PLACEHOLDER: &str = "[OUTPUT BLOCKED - Secrets detected]";
const OUTPUT_BLOCKED_REASON: &str = "Security blocked: Output contained secrets";
const ANOMALY_SUFFIX: &str = "; anomalous behavior detected";

/// External authorization check. Failures are treated as denials.
#[async_trait]
pub trait PlatformAuthorizer: Send + Sync {
    async fn is_platform_user_authorized(
        &self,
        user_id: &str,
        channel_id: &str,
        platform_user_id: &str,
    ) -> anyhow::Result<bool>;
}

/// The orchestrator. Owns nothing but references to the singletons the
/// gateway root constructed.
pub struct SecurityOrchestrator {
    classifier: Arc<CommandClassifier>,
    injection: Arc<InjectionDetector>,
    rate_limiter: Option<Arc<RateLimiter>>,
    anomaly: Arc<AnomalyDetector>,
    audit: Arc<AuditLog>,
    secrets: Arc<SecretsScanner>,
    authorizer: Arc<dyn PlatformAuthorizer>,
    custom_rules: RwLock<HashMap<String, CustomRuleSet>>,
}

impl SecurityOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        classifier: Arc<CommandClassifier>,
        injection: Arc<InjectionDetector>,
        rate_limiter: Option<Arc<RateLimiter>>,
        anomaly: Arc<AnomalyDetector>,
        audit: Arc<AuditLog>,
        secrets: Arc<SecretsScanner>,
        authorizer: Arc<dyn PlatformAuthorizer>,
    ) -> Arc<Self> {
        Arc::new(Self {
            classifier,
            injection,
            rate_limiter,
            anomaly,
            audit,
            secrets,
            authorizer,
            custom_rules: RwLock::new(HashMap::new()),
        })
    }

    /// Register the before/after security hooks on the pipeline.
    pub fn register(self: &Arc<Self>, pipeline: &HookPipeline) {
        pipeline.register_before(
            SECURITY_HOOK_PRIORITY,
            Arc::new(SecurityBeforeHook {
                orchestrator: self.clone(),
            }),
        );
        pipeline.register_after(
            SECURITY_HOOK_PRIORITY,
            Arc::new(SecurityAfterHook {
                orchestrator: self.clone(),
            }),
        );
    }

    /// Install per-caller rule overrides.
    pub async fn set_custom_rules(&self, user_id: &str, rules: CustomRuleSet) {
        self.custom_rules
            .write()
            .await
            .insert(user_id.to_string(), rules);
    }

    /// The before-tool-call sequence.
    pub async fn before_shell(&self, event: &ToolCallEvent, ctx: &HookContext) -> HookOutcome {
        let command = event
            .params
            .get("command")
            .and_then(Value::as_str)
            .unwrap_or("");
        let user_id = identity(&ctx.user_id);
        let channel_id = identity(&ctx.channel_id);
        let platform_user_id = identity(&ctx.platform_user_id);

        // Authorization, failing safe on backend errors.
        match self
            .authorizer
            .is_platform_user_authorized(&user_id, &channel_id, &platform_user_id)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                self.audit.create(
                    command,
                    CommandTier::Red,
                    PolicyAction::Block,
                    AUTHZ_DENIED_AUDIT,
                    &user_id,
                    &channel_id,
                );
                return HookOutcome::block(AUTHZ_DENIED_REASON);
            }
            Err(error) => {
                warn!(user_id = %user_id, error = %error, "Authorization check failed");
                self.audit.create(
                    command,
                    CommandTier::Red,
                    PolicyAction::Block,
                    "Authorization check failed",
                    &user_id,
                    &channel_id,
                );
                return HookOutcome::block(AUTHZ_ERROR_REASON);
            }
        }

        // Injection screening ahead of classification.
        let injection = self.injection.detect(command);
        if injection.confidence > 0.5 {
            self.audit.create(
                command,
                CommandTier::Red,
                PolicyAction::Block,
                &injection.reason,
                &user_id,
                &channel_id,
            );
            return HookOutcome::block(format!("Security blocked: {}", injection.reason));
        }

        // Rate limiting: denial is transient, so it is not audited.
        if let Some(limiter) = &self.rate_limiter {
            let decision = limiter.check(&user_id, ctx.channel_id.as_deref());
            if !decision.allowed {
                let retry_ms = decision.retry_after_ms.unwrap_or(0);
                let retry_secs = (retry_ms + 999) / 1_000;
                return HookOutcome::block(format!(
                    "Rate limit exceeded. Retry in {retry_secs}s"
                ));
            }
        }

        let rules = self.custom_rules.read().await.get(&user_id).cloned();
        let mut classification = self
            .classifier
            .classify_with_rules(command, rules.as_ref());

        self.escalate_for_anomaly(&user_id, command, &mut classification)
            .await;

        let entry = self.audit.create(
            command,
            classification.tier,
            classification.action,
            &classification.reason,
            &user_id,
            &channel_id,
        );
        info!(
            user_id = %user_id,
            tier = classification.tier.as_str(),
            action = classification.action.as_str(),
            audit_id = %entry.id,
            "Shell command classified"
        );

        match classification.action {
            PolicyAction::Block => HookOutcome::block(format!(
                "Command blocked for security: {}",
                classification.reason
            )),
            PolicyAction::Ask => {
                let mut params = event.params.clone();
                params[AUDIT_ID_KEY] = Value::String(entry.id);
                params[TIER_KEY] = Value::String(classification.tier.as_str().to_string());
                params[REASON_KEY] = Value::String(classification.reason.clone());
                HookOutcome::Mutate { params }
            }
            PolicyAction::Allow => {
                let mut params = event.params.clone();
                params[AUDIT_ID_KEY] = Value::String(entry.id);
                HookOutcome::Mutate { params }
            }
        }
    }

    /// Behavioral escalation after classification: green anomalies become
    /// asks, high-scoring yellows become blocks.
    async fn escalate_for_anomaly(
        &self,
        user_id: &str,
        command: &str,
        classification: &mut Classification,
    ) {
        let report = self.anomaly.analyze(user_id, command).await;

        match (classification.tier, classification.action) {
            (CommandTier::Green, PolicyAction::Allow) if report.is_anomaly => {
                classification.tier = CommandTier::Yellow;
                classification.action = PolicyAction::Ask;
                classification.requires_approval = true;
                classification.reason.push_str(ANOMALY_SUFFIX);
            }
            (CommandTier::Yellow, _) if report.score >= 0.7 => {
                classification.tier = CommandTier::Red;
                classification.action = PolicyAction::Block;
                classification.requires_approval = false;
                classification.reason.push_str(ANOMALY_SUFFIX);
            }
            _ => {}
        }
    }

    /// The after-tool-call sequence: scrub the output, update the audit
    /// entry, and suppress the result entirely in block mode.
    pub async fn after_shell(&self, event: &ToolCallEvent, _ctx: &HookContext) -> HookOutcome {
        let Some(audit_id) = event.params.get(AUDIT_ID_KEY).and_then(Value::as_str) else {
            return HookOutcome::Pass;
        };

        let output = match &event.result {
            Some(Value::String(text)) => text.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };

        let report = self.secrets.scan_output(&output);
        let now = Utc::now();

        let patch = if report.has_secrets {
            match self.secrets.config().mode {
                crate::models::DetectionMode::Block => {
                    let patch = AuditPatch {
                        output: Some(OUTPUT_BLOCKED_PLACEHOLDER.to_string()),
                        secrets_found: Some(report.matches.clone()),
                        secrets_redacted: Some(true),
                        executed_at: Some(now),
                        error: event.error.clone(),
                        ..Default::default()
                    };
                    self.apply_audit_patch(audit_id, patch);
                    warn!(audit_id = %audit_id, count = report.count, "Output blocked: secrets detected");
                    return HookOutcome::block(OUTPUT_BLOCKED_REASON);
                }
                crate::models::DetectionMode::Redact => AuditPatch {
                    output: report
                        .redacted_text
                        .as_deref()
                        .map(|text| truncate_output(text)),
                    secrets_found: Some(report.matches.clone()),
                    secrets_redacted: Some(true),
                    executed_at: Some(now),
                    error: event.error.clone(),
                    ..Default::default()
                },
                // Warn mode records the findings but performs no replacement.
                crate::models::DetectionMode::Warn => AuditPatch {
                    output: Some(truncate_output(&output)),
                    secrets_found: Some(report.matches.clone()),
                    secrets_redacted: Some(false),
                    executed_at: Some(now),
                    error: event.error.clone(),
                    ..Default::default()
                },
            }
        } else {
            AuditPatch {
                output: Some(truncate_output(&output)),
                executed_at: Some(now),
                error: event.error.clone(),
                ..Default::default()
            }
        };

        self.apply_audit_patch(audit_id, patch);
        HookOutcome::Pass
    }

    fn apply_audit_patch(&self, audit_id: &str, patch: AuditPatch) {
        if let Err(error) = self.audit.update(audit_id, patch) {
            warn!(audit_id = %audit_id, error = %error, "Failed to update audit entry");
        }
    }
}

fn identity(value: &Option<String>) -> String {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .unwrap_or(UNKNOWN_IDENTITY)
        .to_string()
}

fn truncate_output(text: &str) -> String {
    if text.len() <= MAX_AUDIT_OUTPUT_BYTES {
        return text.to_string();
    }
    let mut end = MAX_AUDIT_OUTPUT_BYTES;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

/// Before-hook adapter for the pipeline.
pub struct SecurityBeforeHook {
    orchestrator: Arc<SecurityOrchestrator>,
}

#[async_trait]
impl BeforeHook for SecurityBeforeHook {
    fn name(&self) -> &str {
        "security-orchestrator"
    }

    async fn on_before(
        &self,
        event: &ToolCallEvent,
        ctx: &HookContext,
    ) -> anyhow::Result<HookOutcome> {
        if event.tool_name != SHELL_TOOL_NAME {
            return Ok(HookOutcome::Pass);
        }
        Ok(self.orchestrator.before_shell(event, ctx).await)
    }
}

/// After-hook adapter for the pipeline.
pub struct SecurityAfterHook {
    orchestrator: Arc<SecurityOrchestrator>,
}

#[async_trait]
impl AfterHook for SecurityAfterHook {
    fn name(&self) -> &str {
        "security-output-scrubber"
    }

    async fn on_after(
        &self,
        event: &ToolCallEvent,
        ctx: &HookContext,
    ) -> anyhow::Result<HookOutcome> {
        if event.tool_name != SHELL_TOOL_NAME {
            return Ok(HookOutcome::Pass);
        }
        Ok(self.orchestrator.after_shell(event, ctx).await)
    }
}

//! JSON RPC surface for the dashboard.
//!
//! One request enum variant per contract method, adjacently tagged so the
//! wire shape is `{"method": "...", "params": {...}}`. Responses are either
//! `{"type": "success", "data": ...}` or `{"type": "error", "data": {code,
//! message}}` with codes from the §7-style taxonomy. The host runtime owns
//! the transport; this module is pure dispatch.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::GatewayCore;
use crate::error::{ErrorCode, GatewayError};
use crate::models::{
    AuditQuery, CommandTier, CronJob, CustomRuleSet, DetectionConfig, DetectionMode,
    PolicyAction, Sensitivity,
};

/// Request envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum RpcRequest {
    #[serde(rename = "security.classify")]
    SecurityClassify {
        command: String,
        #[serde(default)]
        rules: Option<CustomRuleSet>,
    },

    #[serde(rename = "security.classifyWithLLM")]
    SecurityClassifyWithLlm { command: String },

    #[serde(rename = "audit.logs")]
    AuditLogs {
        #[serde(default)]
        user_id: Option<String>,
        #[serde(default)]
        limit: Option<usize>,
        #[serde(default)]
        offset: Option<usize>,
        #[serde(default)]
        tier: Option<CommandTier>,
        #[serde(default)]
        action: Option<PolicyAction>,
    },

    #[serde(rename = "audit.stats")]
    AuditStats {
        #[serde(default)]
        user_id: Option<String>,
        #[serde(default)]
        days: Option<i64>,
    },

    #[serde(rename = "approvals.pending")]
    ApprovalsPending {},

    #[serde(rename = "approvals.approve")]
    ApprovalsApprove { id: String, approved_by: String },

    #[serde(rename = "approvals.reject")]
    ApprovalsReject {
        id: String,
        #[serde(default)]
        reason: Option<String>,
    },

    #[serde(rename = "security.rateLimit.status")]
    RateLimitStatus {
        user_id: String,
        #[serde(default)]
        channel_id: Option<String>,
    },

    #[serde(rename = "security.rateLimit.reset")]
    RateLimitReset { user_id: String },

    #[serde(rename = "security.anomaly.analyze")]
    AnomalyAnalyze { user_id: String, command: String },

    #[serde(rename = "security.anomaly.updateBaseline")]
    AnomalyUpdateBaseline { user_id: String },

    #[serde(rename = "security.anomaly.getBaseline")]
    AnomalyGetBaseline { user_id: String },

    #[serde(rename = "security.secrets.scan")]
    SecretsScan { text: String },

    #[serde(rename = "security.secrets.redact")]
    SecretsRedact { text: String },

    #[serde(rename = "security.secrets.configure")]
    SecretsConfigure {
        #[serde(default)]
        mode: Option<DetectionMode>,
        #[serde(default)]
        enable_line_numbers: Option<bool>,
        #[serde(default)]
        max_per_type: Option<usize>,
    },

    #[serde(rename = "security.secrets.getConfig")]
    SecretsGetConfig {},

    #[serde(rename = "security.injection.detect")]
    InjectionDetect {
        text: String,
        #[serde(default)]
        sensitivity: Option<Sensitivity>,
    },

    #[serde(rename = "security.injection.sanitize")]
    InjectionSanitize { text: String },

    #[serde(rename = "sandbox.status")]
    SandboxStatus { user_id: String },

    #[serde(rename = "sandbox.create")]
    SandboxCreate { user_id: String },

    #[serde(rename = "sandbox.kill")]
    SandboxKill { user_id: String },

    #[serde(rename = "sandbox.hibernate")]
    SandboxHibernate { user_id: String },

    #[serde(rename = "cron.create")]
    CronCreate {
        user_id: String,
        name: String,
        #[serde(default)]
        description: Option<String>,
        cron_expression: String,
        command: String,
        channel_id: String,
        #[serde(default)]
        timezone: Option<String>,
    },

    #[serde(rename = "cron.list")]
    CronList {
        #[serde(default)]
        user_id: Option<String>,
    },

    #[serde(rename = "cron.get")]
    CronGet { id: String },

    #[serde(rename = "cron.update")]
    CronUpdate {
        id: String,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        cron_expression: Option<String>,
        #[serde(default)]
        command: Option<String>,
        #[serde(default)]
        timezone: Option<String>,
        #[serde(default)]
        enabled: Option<bool>,
    },

    #[serde(rename = "cron.delete")]
    CronDelete { id: String },

    #[serde(rename = "cron.enable")]
    CronEnable { id: String },

    #[serde(rename = "cron.disable")]
    CronDisable { id: String },

    #[serde(rename = "cron.stats")]
    CronStats {},
}

/// Response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum RpcResponse {
    Success(Value),
    Error { code: ErrorCode, message: String },
}

impl RpcResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        match serde_json::to_value(data) {
            Ok(value) => Self::Success(value),
            Err(error) => Self::Error {
                code: ErrorCode::InternalError,
                message: format!("Failed to serialize response: {error}"),
            },
        }
    }

    pub fn error(error: GatewayError) -> Self {
        Self::Error {
            code: error.code(),
            message: error.to_string(),
        }
    }
}

impl From<GatewayError> for RpcResponse {
    fn from(error: GatewayError) -> Self {
        Self::error(error)
    }
}

impl GatewayCore {
    /// Parse and dispatch a raw JSON request line.
    pub async fn handle_rpc_json(&self, raw: &str) -> RpcResponse {
        match serde_json::from_str::<RpcRequest>(raw) {
            Ok(request) => self.handle_rpc(request).await,
            Err(error) => RpcResponse::error(GatewayError::InvalidParams(error.to_string())),
        }
    }

    /// Dispatch one request.
    pub async fn handle_rpc(&self, request: RpcRequest) -> RpcResponse {
        match request {
            RpcRequest::SecurityClassify { command, rules } => {
                RpcResponse::success(self.classifier.classify_with_rules(&command, rules.as_ref()))
            }

            RpcRequest::SecurityClassifyWithLlm { command } => {
                let Some(llm) = &self.llm_classifier else {
                    return RpcResponse::error(GatewayError::Internal(
                        "LLM classifier not configured".to_string(),
                    ));
                };
                match llm.classify(&command).await {
                    Ok(classification) => RpcResponse::success(classification),
                    Err(error) => {
                        RpcResponse::error(GatewayError::Internal(error.to_string()))
                    }
                }
            }

            RpcRequest::AuditLogs {
                user_id,
                limit,
                offset,
                tier,
                action,
            } => {
                let query = AuditQuery {
                    tier,
                    action,
                    limit: limit.unwrap_or(50),
                    offset: offset.unwrap_or(0),
                    ..Default::default()
                };
                let entries = self.audit.query(user_id.as_deref(), &query);
                let total = self.audit.count(user_id.as_deref());
                RpcResponse::success(json!({"entries": entries, "total": total}))
            }

            RpcRequest::AuditStats { user_id, days } => {
                RpcResponse::success(self.audit.stats(user_id.as_deref(), days.unwrap_or(7)))
            }

            RpcRequest::ApprovalsPending {} => {
                let requests = self.approvals.list_pending().await;
                RpcResponse::success(json!({"count": requests.len(), "requests": requests}))
            }

            RpcRequest::ApprovalsApprove { id, approved_by } => {
                match self.approvals.approve(&id, &approved_by).await {
                    Ok(_) => RpcResponse::success(json!({"success": true})),
                    Err(error) => RpcResponse::error(error),
                }
            }

            RpcRequest::ApprovalsReject { id, reason } => {
                match self.approvals.reject(&id, reason).await {
                    Ok(_) => RpcResponse::success(json!({"success": true})),
                    Err(error) => RpcResponse::error(error),
                }
            }

            RpcRequest::RateLimitStatus {
                user_id,
                channel_id,
            } => match &self.rate_limiter {
                Some(limiter) => {
                    RpcResponse::success(limiter.status(&user_id, channel_id.as_deref()))
                }
                None => RpcResponse::error(GatewayError::Internal(
                    "Rate limiter not configured".to_string(),
                )),
            },

            RpcRequest::RateLimitReset { user_id } => match &self.rate_limiter {
                Some(limiter) => {
                    limiter.reset(&user_id);
                    RpcResponse::success(json!({"success": true}))
                }
                None => RpcResponse::error(GatewayError::Internal(
                    "Rate limiter not configured".to_string(),
                )),
            },

            RpcRequest::AnomalyAnalyze { user_id, command } => {
                RpcResponse::success(self.anomaly.analyze(&user_id, &command).await)
            }

            RpcRequest::AnomalyUpdateBaseline { user_id } => {
                let baseline = self.anomaly.update_baseline(&user_id).await;
                RpcResponse::success(json!({"success": true, "baseline": baseline}))
            }

            RpcRequest::AnomalyGetBaseline { user_id } => {
                RpcResponse::success(json!({"baseline": self.anomaly.get_baseline(&user_id).await}))
            }

            RpcRequest::SecretsScan { text } => RpcResponse::success(self.secrets.scan_output(&text)),

            RpcRequest::SecretsRedact { text } => {
                let matches = self.secrets.scan(&text);
                let redacted = self.secrets.redact(&text);
                RpcResponse::success(json!({
                    "redacted": redacted,
                    "found": matches.len(),
                    "matches": matches,
                }))
            }

            RpcRequest::SecretsConfigure {
                mode,
                enable_line_numbers,
                max_per_type,
            } => {
                let current = self.secrets.config();
                let next = DetectionConfig {
                    mode: mode.unwrap_or(current.mode),
                    enable_line_numbers: enable_line_numbers
                        .unwrap_or(current.enable_line_numbers),
                    max_secrets_per_type: max_per_type.unwrap_or(current.max_secrets_per_type),
                };
                match self.secrets.configure(next) {
                    Ok(config) => {
                        RpcResponse::success(json!({"success": true, "config": config}))
                    }
                    Err(error) => RpcResponse::error(error),
                }
            }

            RpcRequest::SecretsGetConfig {} => {
                RpcResponse::success(json!({"config": self.secrets.config()}))
            }

            RpcRequest::InjectionDetect { text, sensitivity } => {
                let report = match sensitivity {
                    Some(sensitivity) => {
                        self.injection.detect_with_sensitivity(&text, sensitivity)
                    }
                    None => self.injection.detect(&text),
                };
                RpcResponse::success(report)
            }

            RpcRequest::InjectionSanitize { text } => {
                let outcome = self.injection.sanitize(&text);
                RpcResponse::success(json!({
                    "original": outcome.original,
                    "sanitized": outcome.sanitized,
                    "modified": outcome.modified,
                }))
            }

            RpcRequest::SandboxStatus { user_id } => {
                RpcResponse::success(self.sandboxes.status(&user_id).await)
            }

            RpcRequest::SandboxCreate { user_id } => {
                match self.sandboxes.get_or_create(&user_id).await {
                    Ok(_) => RpcResponse::success(self.sandboxes.status(&user_id).await),
                    Err(error) => RpcResponse::error(error),
                }
            }

            RpcRequest::SandboxKill { user_id } => {
                self.sandboxes.terminate(&user_id).await;
                RpcResponse::success(json!({"success": true}))
            }

            RpcRequest::SandboxHibernate { user_id } => {
                self.sandboxes.hibernate(&user_id).await;
                RpcResponse::success(json!({"success": true}))
            }

            RpcRequest::CronCreate {
                user_id,
                name,
                description,
                cron_expression,
                command,
                channel_id,
                timezone,
            } => {
                if let Err(error) =
                    crate::cron::scheduler::next_occurrence(&cron_expression, timezone.as_deref())
                {
                    return RpcResponse::error(GatewayError::InvalidParams(error.to_string()));
                }

                let mut job = CronJob::new(user_id, name, cron_expression, command, channel_id);
                job.description = description;
                job.timezone = timezone;

                if let Err(error) = self.cron_store.save(&job).await {
                    return RpcResponse::error(GatewayError::Internal(error.to_string()));
                }
                self.cron.schedule(&job).await;

                match self.cron_store.get(&job.id).await {
                    Some(stored) => RpcResponse::success(stored),
                    None => RpcResponse::success(job),
                }
            }

            RpcRequest::CronList { user_id } => {
                let jobs = match user_id.as_deref() {
                    Some(user) => self.cron_store.list_for_user(user).await,
                    None => self.cron_store.list().await,
                };
                RpcResponse::success(json!({"count": jobs.len(), "jobs": jobs}))
            }

            RpcRequest::CronGet { id } => match self.cron_store.get(&id).await {
                Some(job) => RpcResponse::success(job),
                None => RpcResponse::error(GatewayError::NotFound("Cron job".to_string())),
            },

            RpcRequest::CronUpdate {
                id,
                name,
                description,
                cron_expression,
                command,
                timezone,
                enabled,
            } => {
                let Some(mut job) = self.cron_store.get(&id).await else {
                    return RpcResponse::error(GatewayError::NotFound("Cron job".to_string()));
                };

                if let Some(expression) = &cron_expression
                    && let Err(error) = crate::cron::scheduler::next_occurrence(
                        expression,
                        timezone.as_deref().or(job.timezone.as_deref()),
                    )
                {
                    return RpcResponse::error(GatewayError::InvalidParams(error.to_string()));
                }

                if let Some(name) = name {
                    job.name = name;
                }
                if description.is_some() {
                    job.description = description;
                }
                if let Some(expression) = cron_expression {
                    job.cron_expression = expression;
                }
                if let Some(command) = command {
                    job.command = command;
                }
                if timezone.is_some() {
                    job.timezone = timezone;
                }
                if let Some(enabled) = enabled {
                    job.enabled = enabled;
                }
                job.touch();

                if let Err(error) = self.cron_store.save(&job).await {
                    return RpcResponse::error(GatewayError::Internal(error.to_string()));
                }

                if job.enabled {
                    self.cron.schedule(&job).await;
                } else {
                    self.cron.unschedule(&job.id).await;
                }
                RpcResponse::success(job)
            }

            RpcRequest::CronDelete { id } => {
                self.cron.unschedule(&id).await;
                match self.cron_store.delete(&id).await {
                    Ok(true) => RpcResponse::success(json!({"success": true})),
                    Ok(false) => {
                        RpcResponse::error(GatewayError::NotFound("Cron job".to_string()))
                    }
                    Err(error) => RpcResponse::error(GatewayError::Internal(error.to_string())),
                }
            }

            RpcRequest::CronEnable { id } => self.set_cron_enabled(&id, true).await,
            RpcRequest::CronDisable { id } => self.set_cron_enabled(&id, false).await,

            RpcRequest::CronStats {} => RpcResponse::success(self.cron.stats().await),
        }
    }

    async fn set_cron_enabled(&self, id: &str, enabled: bool) -> RpcResponse {
        let Some(mut job) = self.cron_store.get(id).await else {
            return RpcResponse::error(GatewayError::NotFound("Cron job".to_string()));
        };
        job.enabled = enabled;
        job.touch();
        if !enabled {
            job.next_execution_at = None;
        }

        if let Err(error) = self.cron_store.save(&job).await {
            return RpcResponse::error(GatewayError::Internal(error.to_string()));
        }

        if enabled {
            self.cron.schedule(&job).await;
        } else {
            self.cron.unschedule(id).await;
        }
        RpcResponse::success(job)
    }
}

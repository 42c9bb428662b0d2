//! Shellgate: a multi-tenant shell-command security and execution gateway.
//!
//! Tool invocations from agents pass through a policy pipeline before
//! execution: they are authorized, classified by risk, optionally routed to
//! an isolated per-user sandbox, and their output is scrubbed for secrets
//! before being returned. [`GatewayCore`] constructs and owns every
//! component and wires the security orchestrator onto the hook pipeline.
//!
//! ```rust,ignore
//! use shellgate_core::{GatewayCore, GatewayDeps, GatewayConfig};
//!
//! let core = GatewayCore::new(GatewayConfig::default(), deps);
//! core.start().await?;
//!
//! let result = core.hooks.run_before(event, &ctx).await;
//! ```

pub mod anomaly;
pub mod approval;
pub mod audit;
pub mod classifier;
pub mod config;
pub mod cron;
pub mod error;
pub mod hooks;
pub mod injection;
pub mod logging;
pub mod models;
pub mod orchestrator;
pub mod patterns;
pub mod ratelimit;
pub mod rpc;
pub mod sandbox;
pub mod secrets;
pub mod storage;

use std::sync::Arc;

pub use config::GatewayConfig;
pub use error::{ErrorCode, GatewayError, Result};
pub use models::*;

use crate::anomaly::AnomalyDetector;
use crate::approval::ApprovalWaiter;
use crate::audit::AuditLog;
use crate::classifier::{CommandClassifier, LlmClassifier};
use crate::cron::{AgentInvoker, CronJobStore, CronScheduler};
use crate::hooks::HookPipeline;
use crate::injection::InjectionDetector;
use crate::orchestrator::{PlatformAuthorizer, SecurityOrchestrator};
use crate::ratelimit::RateLimiter;
use crate::sandbox::SandboxManager;
use crate::secrets::SecretsScanner;
use crate::storage::KvStore;

use shellgate_sandbox::SandboxProvider;

/// External collaborators injected at construction.
pub struct GatewayDeps {
    pub authorizer: Arc<dyn PlatformAuthorizer>,
    pub sandbox_provider: Arc<dyn SandboxProvider>,
    pub kv_store: Arc<dyn KvStore>,
    pub agent_invoker: Option<Arc<dyn AgentInvoker>>,
    pub llm_classifier: Option<Arc<dyn LlmClassifier>>,
}

/// Root of the gateway: owns every singleton and the hook wiring.
///
/// Components are explicit objects passed into hooks at registration time;
/// nothing here is process-global.
pub struct GatewayCore {
    pub config: GatewayConfig,
    pub hooks: Arc<HookPipeline>,
    pub classifier: Arc<CommandClassifier>,
    pub injection: Arc<InjectionDetector>,
    pub secrets: Arc<SecretsScanner>,
    pub rate_limiter: Option<Arc<RateLimiter>>,
    pub anomaly: Arc<AnomalyDetector>,
    pub audit: Arc<AuditLog>,
    pub approvals: Arc<ApprovalWaiter>,
    pub sandboxes: Arc<SandboxManager>,
    pub cron_store: Arc<CronJobStore>,
    pub cron: CronScheduler,
    pub orchestrator: Arc<SecurityOrchestrator>,
    pub(crate) llm_classifier: Option<Arc<dyn LlmClassifier>>,
}

impl GatewayCore {
    pub fn new(config: GatewayConfig, deps: GatewayDeps) -> Arc<Self> {
        let hooks = Arc::new(HookPipeline::new());
        let classifier = Arc::new(CommandClassifier::with_defaults());
        let injection = Arc::new(InjectionDetector::new(config.injection_sensitivity));
        let secrets = Arc::new(SecretsScanner::new(config.secrets.clone()));
        let rate_limiter = config
            .rate_limit
            .clone()
            .map(|rate_config| Arc::new(RateLimiter::new(rate_config)));
        let anomaly = Arc::new(AnomalyDetector::new());
        let audit = Arc::new(AuditLog::new());
        let approvals = Arc::new(ApprovalWaiter::new(config.approval_timeout()));

        let sandboxes = SandboxManager::new(
            deps.sandbox_provider,
            config.sandbox_idle_timeout(),
            config.resolve_sandbox_api_key(),
        );

        let cron_store = Arc::new(CronJobStore::new(deps.kv_store));
        let mut cron =
            CronScheduler::new(cron_store.clone(), config.cron.clone()).with_hooks(hooks.clone());
        if let Some(invoker) = deps.agent_invoker {
            cron = cron.with_invoker(invoker);
        }

        let orchestrator = SecurityOrchestrator::new(
            classifier.clone(),
            injection.clone(),
            rate_limiter.clone(),
            anomaly.clone(),
            audit.clone(),
            secrets.clone(),
            deps.authorizer,
        );
        orchestrator.register(&hooks);

        Arc::new(Self {
            config,
            hooks,
            classifier,
            injection,
            secrets,
            rate_limiter,
            anomaly,
            audit,
            approvals,
            sandboxes,
            cron_store,
            cron,
            orchestrator,
            llm_classifier: deps.llm_classifier,
        })
    }

    /// Load persisted state and arm schedules.
    pub async fn start(&self) -> anyhow::Result<()> {
        self.cron.start().await?;
        Ok(())
    }

    /// Cancel timers and tear down every sandbox.
    pub async fn shutdown(&self) {
        self.cron.unschedule_all().await;
        self.sandboxes.terminate_all().await;
    }
}

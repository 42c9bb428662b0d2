//! Cron scheduler: timers, concurrency caps, and retry accounting.
//!
//! One timer task per scheduled job. When a timer fires the scheduler checks
//! the concurrency cap (over-capacity jobs are re-armed for now, not
//! dropped), executes the job under an overall timeout, persists the
//! outcome, and re-arms: from the cron expression on success, with linear
//! backoff while retries remain on failure. Executions also fire the shared
//! hook bus so audit-style subscribers observe cron traffic.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::store::CronJobStore;
use super::{CronConfig, CronStats};
use crate::hooks::{BeforeResult, HookPipeline};
use crate::models::{CronJob, HookContext, ToolCallEvent};

/// HTTP target bodies are truncated to this many bytes.
const HTTP_BODY_LIMIT: usize = 1_000;

/// Tool name cron executions carry on the hook bus.
const CRON_TOOL_NAME: &str = "Cron";

static SHELL_WHITELIST: Lazy<Vec<Regex>> = Lazy::new(|| {
    [r"^echo(\s|$)", r"^date$", r"^pwd$", r"^whoami$"]
        .iter()
        .map(|source| Regex::new(source).expect("shell whitelist regex"))
        .collect()
});

/// Abstract dispatch target for `agent:` commands.
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    async fn invoke(&self, job: &CronJob, input: &str) -> anyhow::Result<String>;
}

struct ScheduledTask {
    timer: AbortHandle,
    next_execution: DateTime<Utc>,
}

struct Inner {
    store: Arc<CronJobStore>,
    config: CronConfig,
    tasks: Mutex<HashMap<String, ScheduledTask>>,
    active_executions: AtomicUsize,
    http: reqwest::Client,
    invoker: Option<Arc<dyn AgentInvoker>>,
    hooks: Option<Arc<HookPipeline>>,
}

/// The scheduler handle. Cheap to clone; timers hold their own references.
#[derive(Clone)]
pub struct CronScheduler {
    inner: Arc<Inner>,
}

impl CronScheduler {
    pub fn new(store: Arc<CronJobStore>, config: CronConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                config,
                tasks: Mutex::new(HashMap::new()),
                active_executions: AtomicUsize::new(0),
                http: reqwest::Client::new(),
                invoker: None,
                hooks: None,
            }),
        }
    }

    pub fn with_invoker(mut self, invoker: Arc<dyn AgentInvoker>) -> Self {
        let inner = Arc::get_mut(&mut self.inner)
            .expect("configure the scheduler before sharing it");
        inner.invoker = Some(invoker);
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<HookPipeline>) -> Self {
        let inner = Arc::get_mut(&mut self.inner)
            .expect("configure the scheduler before sharing it");
        inner.hooks = Some(hooks);
        self
    }

    /// Load persisted jobs and schedule the enabled ones. Returns how many
    /// were scheduled.
    pub async fn start(&self) -> anyhow::Result<usize> {
        let loaded = self.inner.store.load_all().await?;
        debug!(loaded, "Loaded cron jobs");

        let mut scheduled = 0usize;
        for job in self.inner.store.list().await {
            if job.enabled {
                self.schedule(&job).await;
                scheduled += 1;
            }
        }
        info!(scheduled, "Cron scheduler started");
        Ok(scheduled)
    }

    /// Arm a timer for the job's next occurrence. Disabled jobs are
    /// ignored; an unparseable expression is recorded on the job and the
    /// job is left unscheduled.
    pub async fn schedule(&self, job: &CronJob) {
        if !job.enabled {
            return;
        }
        self.unschedule(&job.id).await;

        let next = match next_occurrence(&job.cron_expression, job.timezone.as_deref()) {
            Ok(next) => next,
            Err(parse_error) => {
                warn!(job_id = %job.id, error = %parse_error, "Invalid cron expression");
                if let Some(mut stored) = self.inner.store.get(&job.id).await {
                    stored.last_error = Some(parse_error.to_string());
                    stored.next_execution_at = None;
                    stored.touch();
                    if let Err(error) = self.inner.store.save(&stored).await {
                        error!(job_id = %job.id, error = %error, "Failed to persist cron job");
                    }
                }
                return;
            }
        };

        if let Some(mut stored) = self.inner.store.get(&job.id).await {
            stored.next_execution_at = Some(next);
            if let Err(error) = self.inner.store.save(&stored).await {
                error!(job_id = %job.id, error = %error, "Failed to persist cron job");
            }
        }

        Inner::arm(self.inner.clone(), job.id.clone(), next).await;
        debug!(job_id = %job.id, next = %next, "Cron job scheduled");
    }

    /// Cancel the job's timer. Returns whether one existed.
    pub async fn unschedule(&self, id: &str) -> bool {
        let mut tasks = self.inner.tasks.lock().await;
        if let Some(task) = tasks.remove(id) {
            task.timer.abort();
            true
        } else {
            false
        }
    }

    /// Cancel every timer.
    pub async fn unschedule_all(&self) {
        let mut tasks = self.inner.tasks.lock().await;
        for (_, task) in tasks.drain() {
            task.timer.abort();
        }
    }

    /// Next armed execution time for a job, if scheduled.
    pub async fn next_execution(&self, id: &str) -> Option<DateTime<Utc>> {
        self.inner
            .tasks
            .lock()
            .await
            .get(id)
            .map(|task| task.next_execution)
    }

    pub async fn scheduled_count(&self) -> usize {
        self.inner.tasks.lock().await.len()
    }

    pub fn active_executions(&self) -> usize {
        self.inner.active_executions.load(Ordering::SeqCst)
    }

    pub async fn stats(&self) -> CronStats {
        let jobs = self.inner.store.list().await;
        CronStats {
            total_jobs: jobs.len(),
            enabled_jobs: jobs.iter().filter(|job| job.enabled).count(),
            scheduled_jobs: self.scheduled_count().await,
            total_executions: jobs.iter().map(|job| job.execution_count).sum(),
            total_failures: jobs.iter().map(|job| u64::from(job.failure_count)).sum(),
            active_executions: self.active_executions(),
        }
    }
}

impl Inner {
    // Boxed to break the `arm` <-> `fire` mutual-recursion cycle (fire's
    // requeue path awaits `arm` directly), which otherwise defeats the
    // compiler's auto-trait (Send) inference for the generated futures.
    fn arm(
        inner: Arc<Inner>,
        job_id: String,
        at: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move {
            let delay = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            let timer = {
                let inner = inner.clone();
                let job_id = job_id.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    Inner::fire(inner, job_id).await;
                })
                .abort_handle()
            };

            let mut tasks = inner.tasks.lock().await;
            if let Some(previous) = tasks.insert(
                job_id,
                ScheduledTask {
                    timer,
                    next_execution: at,
                },
            ) {
                previous.timer.abort();
            }
        })
    }

    async fn fire(inner: Arc<Inner>, job_id: String) {
        inner.tasks.lock().await.remove(&job_id);

        // Over capacity: requeue without executing. The tick is deferred,
        // never dropped.
        if inner.active_executions.load(Ordering::SeqCst) >= inner.config.max_concurrent {
            debug!(job_id = %job_id, "Cron at capacity; requeueing");
            Inner::arm(inner.clone(), job_id, Utc::now()).await;
            return;
        }

        inner.active_executions.fetch_add(1, Ordering::SeqCst);
        Inner::run_job(&inner, &job_id).await;
        inner.active_executions.fetch_sub(1, Ordering::SeqCst);
    }

    async fn run_job(inner: &Arc<Inner>, job_id: &str) {
        let Some(job) = inner.store.get(job_id).await else {
            debug!(job_id = %job_id, "Cron job vanished before execution");
            return;
        };
        if !job.enabled {
            return;
        }

        info!(job_id = %job.id, name = %job.name, "Cron job firing");
        let ctx = HookContext::for_user(job.user_id.clone(), job.channel_id.clone());
        let params = serde_json::json!({"job_id": job.id, "command": job.command});

        // Cron shares the tool-call hook bus; a before-subscriber may veto.
        let mut vetoed: Option<String> = None;
        if let Some(hooks) = &inner.hooks {
            let event = ToolCallEvent::before(CRON_TOOL_NAME, params.clone());
            if let BeforeResult::Blocked { reason } = hooks.run_before(event, &ctx).await {
                vetoed = Some(format!("Blocked by hook: {reason}"));
            }
        }

        let started = std::time::Instant::now();
        let outcome: Result<String, String> = match vetoed {
            Some(reason) => Err(reason),
            None => {
                let run = timeout(
                    Duration::from_secs(inner.config.execution_timeout_secs),
                    Inner::execute_command(inner, &job),
                )
                .await;
                match run {
                    Ok(result) => result,
                    Err(_) => Err(format!(
                        "Execution timed out after {}s",
                        inner.config.execution_timeout_secs
                    )),
                }
            }
        };

        if let Some(hooks) = &inner.hooks {
            let event = ToolCallEvent::after(
                CRON_TOOL_NAME,
                params,
                outcome
                    .as_ref()
                    .ok()
                    .map(|output| serde_json::Value::String(output.clone())),
                outcome.as_ref().err().cloned(),
                Some(started.elapsed().as_millis() as u64),
            );
            hooks.run_after(&event, &ctx).await;
        }

        match outcome {
            Ok(_) => Inner::on_success(inner, &job.id).await,
            Err(message) => Inner::on_failure(inner, &job.id, message).await,
        }
    }

    async fn on_success(inner: &Arc<Inner>, job_id: &str) {
        let Some(mut job) = inner.store.get(job_id).await else {
            return;
        };

        let now = Utc::now();
        job.last_executed_at = Some(now);
        job.last_error = None;
        job.execution_count += 1;

        // Advance past the tick that just fired.
        let next = next_occurrence(&job.cron_expression, job.timezone.as_deref()).ok();
        job.next_execution_at = next;
        job.touch();

        if let Err(error) = inner.store.save(&job).await {
            error!(job_id = %job_id, error = %error, "Failed to persist cron job");
        }

        if let Some(next) = next {
            Inner::arm(inner.clone(), job.id.clone(), next).await;
        }
    }

    async fn on_failure(inner: &Arc<Inner>, job_id: &str, message: String) {
        let Some(mut job) = inner.store.get(job_id).await else {
            return;
        };

        job.failure_count += 1;
        job.last_error = Some(message.clone());
        warn!(
            job_id = %job_id,
            failure_count = job.failure_count,
            error = %message,
            "Cron job failed"
        );

        let next = if job.failure_count <= inner.config.max_retries {
            // Linear backoff scaled by consecutive failures.
            let backoff = inner.config.retry_backoff_ms * u64::from(job.failure_count);
            Some(Utc::now() + chrono::Duration::milliseconds(backoff as i64))
        } else {
            next_occurrence(&job.cron_expression, job.timezone.as_deref()).ok()
        };

        job.next_execution_at = next;
        job.touch();
        if let Err(error) = inner.store.save(&job).await {
            error!(job_id = %job_id, error = %error, "Failed to persist cron job");
        }

        if let Some(next) = next {
            Inner::arm(inner.clone(), job.id.clone(), next).await;
        }
    }

    /// Dispatch on the command shape: HTTP target, agent invocation, or a
    /// whitelisted shell command.
    async fn execute_command(inner: &Arc<Inner>, job: &CronJob) -> Result<String, String> {
        let command = job.command.trim();

        if command.starts_with("http://") || command.starts_with("https://") {
            let response = inner
                .http
                .get(command)
                .send()
                .await
                .and_then(|response| response.error_for_status())
                .map_err(|error| format!("HTTP request failed: {error}"))?;
            let body = response
                .text()
                .await
                .map_err(|error| format!("Failed to read response body: {error}"))?;
            return Ok(truncate_bytes(&body, HTTP_BODY_LIMIT));
        }

        if let Some(input) = command.strip_prefix("agent:") {
            let Some(invoker) = &inner.invoker else {
                return Err("Agent invoker not configured".to_string());
            };
            return invoker
                .invoke(job, input.trim())
                .await
                .map_err(|error| format!("Agent invocation failed: {error}"));
        }

        if SHELL_WHITELIST.iter().any(|regex| regex.is_match(command)) {
            return Inner::run_shell(command).await;
        }

        Err("Command not allowed".to_string())
    }

    async fn run_shell(command: &str) -> Result<String, String> {
        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|error| format!("Failed to spawn command: {error}"))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!(
                "Command exited with {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

/// Next occurrence of `expression` in `timezone` (UTC when absent),
/// returned in UTC. Conventional five-field expressions are accepted by
/// prepending a seconds field.
pub fn next_occurrence(
    expression: &str,
    timezone: Option<&str>,
) -> anyhow::Result<DateTime<Utc>> {
    let normalized = normalize_expression(expression);
    let schedule = cron::Schedule::from_str(&normalized)
        .map_err(|error| anyhow::anyhow!("Invalid cron expression '{expression}': {error}"))?;

    let tz_name = timezone.unwrap_or("UTC");
    let tz: chrono_tz::Tz = tz_name
        .parse()
        .map_err(|error| anyhow::anyhow!("Invalid timezone '{tz_name}': {error}"))?;

    schedule
        .upcoming(tz)
        .next()
        .map(|at| at.with_timezone(&Utc))
        .ok_or_else(|| anyhow::anyhow!("Cron expression '{expression}' has no upcoming occurrence"))
}

fn normalize_expression(expression: &str) -> String {
    if expression.split_whitespace().count() == 5 {
        format!("0 {expression}")
    } else {
        expression.to_string()
    }
}

fn truncate_bytes(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

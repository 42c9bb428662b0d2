//! Per-user sandbox lifecycle.
//!
//! Each user owns at most one active sandbox. A per-user async lock
//! serializes `get_or_create`/`execute`/`hibernate`/`terminate`, which also
//! gives the single-flight guarantee: concurrent `get_or_create` calls queue
//! on the lock and all but the first observe the sandbox the first one
//! created. Idle timers are generation-checked so a timer armed before a
//! touch, hibernate, or terminate can never act afterwards.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};
use ts_rs::TS;

use shellgate_sandbox::{SandboxHandle, SandboxProvider};

use crate::error::{GatewayError, Result};

/// Per-command execution cap.
const EXEC_TIMEOUT: Duration = Duration::from_secs(30);

/// Structured result of running a command in a user's sandbox. Failures are
/// data, never errors.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ExecResult {
    pub success: bool,
    /// stdout, with stderr appended after a newline when non-empty.
    pub output: String,
    pub exit_code: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Point-in-time view of a user's sandbox.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SandboxStatus {
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(type = "string | null")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(type = "string | null")]
    pub last_activity_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(type = "number | null")]
    pub uptime_ms: Option<i64>,
}

impl SandboxStatus {
    fn inactive() -> Self {
        Self {
            active: false,
            sandbox_id: None,
            created_at: None,
            last_activity_at: None,
            uptime_ms: None,
        }
    }
}

struct ActiveSandbox {
    handle: Arc<dyn SandboxHandle>,
    created_at: DateTime<Utc>,
    last_activity_at: DateTime<Utc>,
    /// Bumped on every touch; a firing idle timer compares its captured
    /// generation before acting.
    generation: u64,
    idle_timer: Option<AbortHandle>,
}

#[derive(Default)]
struct UserSlot {
    state: Mutex<Option<ActiveSandbox>>,
}

/// The sandbox manager. Shared behind an `Arc`; idle timers hold weak
/// references so a dropped manager quietly retires them.
pub struct SandboxManager {
    provider: Arc<dyn SandboxProvider>,
    slots: RwLock<HashMap<String, Arc<UserSlot>>>,
    idle_timeout: Duration,
    api_key: Option<String>,
}

impl SandboxManager {
    pub fn new(
        provider: Arc<dyn SandboxProvider>,
        idle_timeout: Duration,
        api_key: Option<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            provider,
            slots: RwLock::new(HashMap::new()),
            idle_timeout,
            api_key,
        })
    }

    async fn slot(&self, user_id: &str) -> Arc<UserSlot> {
        {
            let slots = self.slots.read().await;
            if let Some(slot) = slots.get(user_id) {
                return slot.clone();
            }
        }
        let mut slots = self.slots.write().await;
        slots.entry(user_id.to_string()).or_default().clone()
    }

    /// Return the user's sandbox, creating it when none is active.
    ///
    /// Holding the per-user lock across the provider call is what makes
    /// creation single-flight: at most one provider `create` per user per
    /// transition, with every waiter receiving its result.
    pub async fn get_or_create(self: &Arc<Self>, user_id: &str) -> Result<Arc<dyn SandboxHandle>> {
        let slot = self.slot(user_id).await;
        let mut state = slot.state.lock().await;

        if let Some(active) = state.as_mut() {
            self.touch(user_id, active);
            return Ok(active.handle.clone());
        }

        let handle = self
            .provider
            .create(user_id, self.api_key.as_deref())
            .await
            .map_err(|error| {
                warn!(user_id = %user_id, error = %error, "Sandbox creation failed");
                GatewayError::SandboxUnavailable(error.to_string())
            })?;

        info!(user_id = %user_id, sandbox_id = %handle.id(), "Sandbox created");
        let now = Utc::now();
        let timer = self.arm_idle_timer(user_id, 0);
        *state = Some(ActiveSandbox {
            handle: handle.clone(),
            created_at: now,
            last_activity_at: now,
            generation: 0,
            idle_timer: Some(timer),
        });

        Ok(handle)
    }

    /// Run a command in the user's sandbox. Never fails; provider errors
    /// come back as `{success: false, ...}`.
    pub async fn execute(self: &Arc<Self>, user_id: &str, command: &str) -> ExecResult {
        let handle = match self.get_or_create(user_id).await {
            Ok(handle) => handle,
            Err(error) => {
                return ExecResult {
                    success: false,
                    output: String::new(),
                    exit_code: 1,
                    error_message: Some(error.to_string()),
                };
            }
        };

        match handle.run(command, EXEC_TIMEOUT).await {
            Ok(run) => {
                let mut output = run.stdout;
                if !run.stderr.is_empty() {
                    output.push('\n');
                    output.push_str(&run.stderr);
                }
                ExecResult {
                    success: run.exit_code == 0,
                    output,
                    exit_code: run.exit_code,
                    error_message: None,
                }
            }
            Err(error) => ExecResult {
                success: false,
                output: String::new(),
                exit_code: 1,
                error_message: Some(error.to_string()),
            },
        }
    }

    /// Suspend the user's sandbox: provider `pause` best-effort, falling
    /// back to `kill`, then drop the mapping.
    pub async fn hibernate(&self, user_id: &str) {
        let slot = self.slot(user_id).await;
        let mut state = slot.state.lock().await;
        if let Some(active) = state.take() {
            if let Some(timer) = active.idle_timer {
                timer.abort();
            }
            info!(user_id = %user_id, sandbox_id = %active.handle.id(), "Hibernating sandbox");
            if let Err(error) = active.handle.pause().await {
                warn!(user_id = %user_id, error = %error, "Pause failed; killing sandbox");
                let _ = active.handle.kill().await;
            }
        }
    }

    /// Destroy the user's sandbox.
    pub async fn terminate(&self, user_id: &str) {
        let slot = self.slot(user_id).await;
        let mut state = slot.state.lock().await;
        if let Some(active) = state.take() {
            if let Some(timer) = active.idle_timer {
                timer.abort();
            }
            info!(user_id = %user_id, sandbox_id = %active.handle.id(), "Terminating sandbox");
            let _ = active.handle.kill().await;
        }
    }

    /// Destroy every active sandbox, concurrently.
    pub async fn terminate_all(&self) {
        let user_ids: Vec<String> = {
            let slots = self.slots.read().await;
            slots.keys().cloned().collect()
        };
        join_all(user_ids.iter().map(|user_id| self.terminate(user_id))).await;
    }

    pub async fn status(&self, user_id: &str) -> SandboxStatus {
        let slot = self.slot(user_id).await;
        let state = slot.state.lock().await;
        match state.as_ref() {
            Some(active) => SandboxStatus {
                active: true,
                sandbox_id: Some(active.handle.id().to_string()),
                created_at: Some(active.created_at),
                last_activity_at: Some(active.last_activity_at),
                uptime_ms: Some((Utc::now() - active.created_at).num_milliseconds()),
            },
            None => SandboxStatus::inactive(),
        }
    }

    /// Record activity: advance the timestamp, invalidate the old idle
    /// timer, and arm a fresh one.
    fn touch(self: &Arc<Self>, user_id: &str, active: &mut ActiveSandbox) {
        active.last_activity_at = Utc::now();
        active.generation += 1;
        if let Some(timer) = active.idle_timer.take() {
            timer.abort();
        }
        active.idle_timer = Some(self.arm_idle_timer(user_id, active.generation));
    }

    fn arm_idle_timer(self: &Arc<Self>, user_id: &str, generation: u64) -> AbortHandle {
        let weak: Weak<Self> = Arc::downgrade(self);
        let user_id = user_id.to_string();
        let idle_timeout = self.idle_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(idle_timeout).await;
            let Some(manager) = weak.upgrade() else {
                return;
            };
            manager.idle_fire(&user_id, generation).await;
        })
        .abort_handle()
    }

    /// Idle timer body. The generation check makes firing exactly-once per
    /// Active period: any touch/hibernate/terminate since arming wins.
    async fn idle_fire(&self, user_id: &str, generation: u64) {
        let slot = self.slot(user_id).await;
        let mut state = slot.state.lock().await;
        let stale = state
            .as_ref()
            .is_none_or(|active| active.generation != generation);
        if stale {
            debug!(user_id = %user_id, "Idle timer superseded; ignoring");
            return;
        }

        if let Some(active) = state.take() {
            info!(user_id = %user_id, sandbox_id = %active.handle.id(), "Idle timeout; hibernating sandbox");
            if let Err(error) = active.handle.pause().await {
                warn!(user_id = %user_id, error = %error, "Pause failed; killing sandbox");
                let _ = active.handle.kill().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use shellgate_sandbox::{RunOutput, SandboxError};
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct MockCounters {
        creates: AtomicU32,
        runs: AtomicU32,
        pauses: AtomicU32,
        kills: AtomicU32,
    }

    struct MockProvider {
        counters: Arc<MockCounters>,
        create_delay: Duration,
        fail_create: bool,
        fail_pause: bool,
    }

    impl MockProvider {
        fn new(counters: Arc<MockCounters>) -> Self {
            Self {
                counters,
                create_delay: Duration::ZERO,
                fail_create: false,
                fail_pause: false,
            }
        }
    }

    struct MockSandbox {
        id: String,
        counters: Arc<MockCounters>,
        fail_pause: bool,
    }

    #[async_trait]
    impl SandboxProvider for MockProvider {
        async fn create(
            &self,
            user_id: &str,
            _api_key: Option<&str>,
        ) -> std::result::Result<Arc<dyn SandboxHandle>, SandboxError> {
            tokio::time::sleep(self.create_delay).await;
            if self.fail_create {
                return Err(SandboxError::CreateFailed("provider down".to_string()));
            }
            let n = self.counters.creates.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(MockSandbox {
                id: format!("sb-{user_id}-{n}"),
                counters: self.counters.clone(),
                fail_pause: self.fail_pause,
            }))
        }
    }

    #[async_trait]
    impl SandboxHandle for MockSandbox {
        fn id(&self) -> &str {
            &self.id
        }

        async fn run(
            &self,
            command: &str,
            _timeout: Duration,
        ) -> std::result::Result<RunOutput, SandboxError> {
            self.counters.runs.fetch_add(1, Ordering::SeqCst);
            if command == "explode" {
                return Err(SandboxError::ExecFailed("boom".to_string()));
            }
            Ok(RunOutput {
                exit_code: if command == "false" { 1 } else { 0 },
                stdout: format!("ran: {command}"),
                stderr: if command == "warnings" {
                    "careful".to_string()
                } else {
                    String::new()
                },
                duration_ms: 1,
            })
        }

        async fn pause(&self) -> std::result::Result<(), SandboxError> {
            self.counters.pauses.fetch_add(1, Ordering::SeqCst);
            if self.fail_pause {
                return Err(SandboxError::Unsupported("no pause".to_string()));
            }
            Ok(())
        }

        async fn kill(&self) -> std::result::Result<(), SandboxError> {
            self.counters.kills.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn manager_with(
        provider: MockProvider,
        idle_timeout: Duration,
    ) -> Arc<SandboxManager> {
        SandboxManager::new(Arc::new(provider), idle_timeout, None)
    }

    #[tokio::test]
    async fn test_get_or_create_reuses_active() {
        let counters = Arc::new(MockCounters::default());
        let manager = manager_with(
            MockProvider::new(counters.clone()),
            Duration::from_secs(60),
        );

        let first = manager.get_or_create("u1").await.unwrap();
        let second = manager.get_or_create("u1").await.unwrap();
        assert_eq!(first.id(), second.id());
        assert_eq!(counters.creates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_single_flight_concurrent_creates() {
        let counters = Arc::new(MockCounters::default());
        let mut provider = MockProvider::new(counters.clone());
        provider.create_delay = Duration::from_millis(50);
        let manager = manager_with(provider, Duration::from_secs(60));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.get_or_create("u1").await.unwrap().id().to_string() })
            })
            .collect();

        let ids: Vec<String> = join_all(tasks)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        assert_eq!(counters.creates.load(Ordering::SeqCst), 1);
        assert!(ids.iter().all(|id| id == &ids[0]));
    }

    #[tokio::test]
    async fn test_per_user_isolation() {
        let counters = Arc::new(MockCounters::default());
        let manager = manager_with(
            MockProvider::new(counters.clone()),
            Duration::from_secs(60),
        );

        let a = manager.get_or_create("u1").await.unwrap();
        let b = manager.get_or_create("u2").await.unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(counters.creates.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_execute_combines_streams() {
        let counters = Arc::new(MockCounters::default());
        let manager = manager_with(
            MockProvider::new(counters.clone()),
            Duration::from_secs(60),
        );

        let result = manager.execute("u1", "warnings").await;
        assert!(result.success);
        assert_eq!(result.output, "ran: warnings\ncareful");
    }

    #[tokio::test]
    async fn test_execute_nonzero_exit() {
        let counters = Arc::new(MockCounters::default());
        let manager = manager_with(
            MockProvider::new(counters.clone()),
            Duration::from_secs(60),
        );

        let result = manager.execute("u1", "false").await;
        assert!(!result.success);
        assert_eq!(result.exit_code, 1);
        assert!(result.error_message.is_none());
    }

    #[tokio::test]
    async fn test_execute_provider_error_is_structured() {
        let counters = Arc::new(MockCounters::default());
        let manager = manager_with(
            MockProvider::new(counters.clone()),
            Duration::from_secs(60),
        );

        let result = manager.execute("u1", "explode").await;
        assert!(!result.success);
        assert_eq!(result.exit_code, 1);
        assert!(result.error_message.unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn test_create_failure_is_structured() {
        let counters = Arc::new(MockCounters::default());
        let mut provider = MockProvider::new(counters.clone());
        provider.fail_create = true;
        let manager = manager_with(provider, Duration::from_secs(60));

        let result = manager.execute("u1", "echo hi").await;
        assert!(!result.success);
        assert!(result.error_message.unwrap().contains("Sandbox unavailable"));
    }

    #[tokio::test]
    async fn test_status_reports_activity() {
        let counters = Arc::new(MockCounters::default());
        let manager = manager_with(
            MockProvider::new(counters.clone()),
            Duration::from_secs(60),
        );

        assert!(!manager.status("u1").await.active);
        manager.get_or_create("u1").await.unwrap();

        let status = manager.status("u1").await;
        assert!(status.active);
        assert!(status.sandbox_id.is_some());
        assert!(status.uptime_ms.unwrap() >= 0);
    }

    #[tokio::test]
    async fn test_idle_timer_hibernates_once() {
        let counters = Arc::new(MockCounters::default());
        let manager = manager_with(
            MockProvider::new(counters.clone()),
            Duration::from_millis(50),
        );

        manager.get_or_create("u1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;

        assert_eq!(counters.pauses.load(Ordering::SeqCst), 1);
        assert!(!manager.status("u1").await.active);
    }

    #[tokio::test]
    async fn test_touch_defers_idle_timer() {
        let counters = Arc::new(MockCounters::default());
        let manager = manager_with(
            MockProvider::new(counters.clone()),
            Duration::from_millis(80),
        );

        manager.get_or_create("u1").await.unwrap();
        for _ in 0..3 {
            tokio::time::sleep(Duration::from_millis(40)).await;
            manager.get_or_create("u1").await.unwrap();
        }
        // Constant touching kept the sandbox alive through 3 windows.
        assert!(manager.status("u1").await.active);
        assert_eq!(counters.pauses.load(Ordering::SeqCst), 0);
        assert_eq!(counters.creates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_hibernate_after_terminate() {
        let counters = Arc::new(MockCounters::default());
        let manager = manager_with(
            MockProvider::new(counters.clone()),
            Duration::from_millis(50),
        );

        manager.get_or_create("u1").await.unwrap();
        manager.terminate("u1").await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(counters.kills.load(Ordering::SeqCst), 1);
        assert_eq!(counters.pauses.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_hibernate_falls_back_to_kill() {
        let counters = Arc::new(MockCounters::default());
        let mut provider = MockProvider::new(counters.clone());
        provider.fail_pause = true;
        let manager = manager_with(provider, Duration::from_secs(60));

        manager.get_or_create("u1").await.unwrap();
        manager.hibernate("u1").await;

        assert_eq!(counters.pauses.load(Ordering::SeqCst), 1);
        assert_eq!(counters.kills.load(Ordering::SeqCst), 1);
        assert!(!manager.status("u1").await.active);
    }

    #[tokio::test]
    async fn test_recreate_after_hibernate() {
        let counters = Arc::new(MockCounters::default());
        let manager = manager_with(
            MockProvider::new(counters.clone()),
            Duration::from_secs(60),
        );

        let first = manager.get_or_create("u1").await.unwrap().id().to_string();
        manager.hibernate("u1").await;
        let second = manager.get_or_create("u1").await.unwrap().id().to_string();

        assert_ne!(first, second);
        assert_eq!(counters.creates.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_terminate_all_fans_out() {
        let counters = Arc::new(MockCounters::default());
        let manager = manager_with(
            MockProvider::new(counters.clone()),
            Duration::from_secs(60),
        );

        manager.get_or_create("u1").await.unwrap();
        manager.get_or_create("u2").await.unwrap();
        manager.get_or_create("u3").await.unwrap();
        manager.terminate_all().await;

        assert_eq!(counters.kills.load(Ordering::SeqCst), 3);
        assert!(!manager.status("u1").await.active);
        assert!(!manager.status("u2").await.active);
        assert!(!manager.status("u3").await.active);
    }
}

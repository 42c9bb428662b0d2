//! Human-in-the-loop approval rendezvous.
//!
//! Each request registers a oneshot waker and arms a timer; `approve` and
//! `reject` race against the timer and against each other by removing the
//! entry, so exactly one resolution wins and the others observe `NotFound`.
//! An optional callback is notified when requests are created and resolved,
//! which is how channel bridges surface approval prompts to operators.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, oneshot};
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::error::{GatewayError, Result};
use crate::models::{ApprovalGrant, ApprovalRequest, ApprovalStatus, CommandTier};

/// Callback for surfacing approval traffic to an external channel.
#[async_trait]
pub trait ApprovalCallback: Send + Sync {
    /// A new request is waiting for a decision.
    async fn on_request(&self, request: &ApprovalRequest) -> anyhow::Result<()>;

    /// A request left the pending state.
    async fn on_resolved(&self, request: &ApprovalRequest, status: ApprovalStatus) -> anyhow::Result<()> {
        let _ = (request, status);
        Ok(())
    }
}

struct PendingEntry {
    request: ApprovalRequest,
    waker: oneshot::Sender<Result<ApprovalGrant>>,
    timer: AbortHandle,
}

/// The approval waiter. Shared behind an `Arc`; the timer tasks hold weak
/// references back into it.
pub struct ApprovalWaiter {
    pending: Arc<Mutex<HashMap<String, PendingEntry>>>,
    default_timeout: Duration,
    callback: Option<Arc<dyn ApprovalCallback>>,
}

impl ApprovalWaiter {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            default_timeout,
            callback: None,
        }
    }

    pub fn with_callback(mut self, callback: Arc<dyn ApprovalCallback>) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Submit a command for approval and wait for the decision.
    ///
    /// Resolves with the grant on approval, or fails with
    /// [`GatewayError::ApprovalTimeout`] / [`GatewayError::ApprovalRejected`].
    pub async fn request(
        &self,
        command: &str,
        tier: CommandTier,
        reason: &str,
        requester_id: &str,
    ) -> Result<ApprovalGrant> {
        self.request_with_timeout(command, tier, reason, requester_id, self.default_timeout)
            .await
    }

    pub async fn request_with_timeout(
        &self,
        command: &str,
        tier: CommandTier,
        reason: &str,
        requester_id: &str,
        timeout: Duration,
    ) -> Result<ApprovalGrant> {
        let (request, rx) = self
            .register(command, tier, reason, requester_id, timeout)
            .await;

        if let Some(callback) = &self.callback
            && let Err(error) = callback.on_request(&request).await
        {
            warn!(approval_id = %request.id, error = %error, "Approval callback failed");
        }

        // The sender is dropped only together with its entry, and every
        // removal path sends a resolution first.
        rx.await
            .unwrap_or(Err(GatewayError::Internal("approval waiter dropped".to_string())))
    }

    /// Register a request without waiting. Returns the receiver half so
    /// callers embedding the waiter can drive the wait themselves.
    pub async fn register(
        &self,
        command: &str,
        tier: CommandTier,
        reason: &str,
        requester_id: &str,
        timeout: Duration,
    ) -> (ApprovalRequest, oneshot::Receiver<Result<ApprovalGrant>>) {
        let request = ApprovalRequest::new(command, tier, reason, requester_id, timeout.as_secs());
        let (tx, rx) = oneshot::channel();

        // Holding the lock across the spawn keeps a zero-length timer from
        // firing before its entry lands in the map.
        let mut pending = self.pending.lock().await;
        let timer = {
            let map = Arc::clone(&self.pending);
            let id = request.id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                let mut pending = map.lock().await;
                if let Some(entry) = pending.remove(&id) {
                    debug!(approval_id = %id, "Approval request timed out");
                    let _ = entry.waker.send(Err(GatewayError::ApprovalTimeout));
                }
            })
            .abort_handle()
        };

        pending.insert(
            request.id.clone(),
            PendingEntry {
                request: request.clone(),
                waker: tx,
                timer,
            },
        );

        (request, rx)
    }

    /// Approve a pending request. Fails with `NotFound` when the id is
    /// unknown or already resolved.
    pub async fn approve(&self, id: &str, approved_by: &str) -> Result<ApprovalRequest> {
        let entry = {
            let mut pending = self.pending.lock().await;
            pending
                .remove(id)
                .ok_or_else(|| GatewayError::NotFound("Approval request".to_string()))?
        };

        entry.timer.abort();
        let grant = ApprovalGrant {
            approved: true,
            approved_by: approved_by.to_string(),
            timestamp: Utc::now(),
        };
        let _ = entry.waker.send(Ok(grant));

        self.notify_resolved(&entry.request, ApprovalStatus::Approved)
            .await;
        Ok(entry.request)
    }

    /// Reject a pending request. Fails with `NotFound` when the id is
    /// unknown or already resolved.
    pub async fn reject(&self, id: &str, reason: Option<String>) -> Result<ApprovalRequest> {
        let entry = {
            let mut pending = self.pending.lock().await;
            pending
                .remove(id)
                .ok_or_else(|| GatewayError::NotFound("Approval request".to_string()))?
        };

        entry.timer.abort();
        let _ = entry
            .waker
            .send(Err(GatewayError::ApprovalRejected { reason }));

        self.notify_resolved(&entry.request, ApprovalStatus::Rejected)
            .await;
        Ok(entry.request)
    }

    /// Pending requests, newest first.
    pub async fn list_pending(&self) -> Vec<ApprovalRequest> {
        let pending = self.pending.lock().await;
        let mut requests: Vec<ApprovalRequest> =
            pending.values().map(|entry| entry.request.clone()).collect();
        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        requests
    }

    /// Defensive sweep for entries past their expiry. The per-request timer
    /// is the primary timeout mechanism; this catches entries whose timer
    /// task was lost (e.g. a runtime shutdown mid-flight).
    pub async fn cleanup_expired(&self) -> usize {
        let expired: Vec<PendingEntry> = {
            let mut pending = self.pending.lock().await;
            let ids: Vec<String> = pending
                .iter()
                .filter(|(_, entry)| entry.request.is_expired())
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| pending.remove(&id))
                .collect()
        };

        let count = expired.len();
        for entry in expired {
            entry.timer.abort();
            let _ = entry.waker.send(Err(GatewayError::ApprovalTimeout));
            self.notify_resolved(&entry.request, ApprovalStatus::Expired)
                .await;
        }
        count
    }

    async fn notify_resolved(&self, request: &ApprovalRequest, status: ApprovalStatus) {
        if let Some(callback) = &self.callback
            && let Err(error) = callback.on_resolved(request, status).await
        {
            warn!(approval_id = %request.id, error = %error, "Approval callback failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn waiter() -> Arc<ApprovalWaiter> {
        Arc::new(ApprovalWaiter::new(Duration::from_secs(300)))
    }

    #[tokio::test]
    async fn test_approve_resolves_requester() {
        let waiter = waiter();
        let (request, rx) = waiter
            .register("rm x", CommandTier::Yellow, "risky", "u1", Duration::from_secs(60))
            .await;

        waiter.approve(&request.id, "admin").await.unwrap();

        let grant = rx.await.unwrap().unwrap();
        assert!(grant.approved);
        assert_eq!(grant.approved_by, "admin");
    }

    #[tokio::test]
    async fn test_reject_resolves_with_error() {
        let waiter = waiter();
        let (request, rx) = waiter
            .register("rm x", CommandTier::Yellow, "risky", "u1", Duration::from_secs(60))
            .await;

        waiter
            .reject(&request.id, Some("too risky".to_string()))
            .await
            .unwrap();

        let outcome = rx.await.unwrap();
        match outcome {
            Err(GatewayError::ApprovalRejected { reason }) => {
                assert_eq!(reason.as_deref(), Some("too risky"));
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_resolves_with_error() {
        let waiter = Arc::new(ApprovalWaiter::new(Duration::from_millis(50)));
        let outcome = waiter
            .request("rm x", CommandTier::Yellow, "risky", "u1")
            .await;
        assert!(matches!(outcome, Err(GatewayError::ApprovalTimeout)));
        assert!(waiter.list_pending().await.is_empty());
    }

    #[tokio::test]
    async fn test_approve_unknown_id_not_found() {
        let waiter = waiter();
        let result = waiter.approve("missing", "admin").await;
        assert!(matches!(result, Err(GatewayError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_approve_then_reject_mutually_exclusive() {
        let waiter = waiter();
        let (request, _rx) = waiter
            .register("rm x", CommandTier::Yellow, "risky", "u1", Duration::from_secs(60))
            .await;

        waiter.approve(&request.id, "admin").await.unwrap();
        let second = waiter.reject(&request.id, None).await;
        assert!(matches!(second, Err(GatewayError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_timer_canceled_after_approval() {
        let waiter = Arc::new(ApprovalWaiter::new(Duration::from_millis(50)));
        let (request, rx) = waiter
            .register("rm x", CommandTier::Yellow, "risky", "u1", Duration::from_millis(50))
            .await;

        waiter.approve(&request.id, "admin").await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;

        // The canceled timer must not have produced a second resolution.
        let grant = rx.await.unwrap().unwrap();
        assert!(grant.approved);
    }

    #[tokio::test]
    async fn test_list_pending_newest_first() {
        let waiter = waiter();
        let (first, _rx1) = waiter
            .register("a", CommandTier::Yellow, "r", "u1", Duration::from_secs(60))
            .await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let (second, _rx2) = waiter
            .register("b", CommandTier::Red, "r", "u1", Duration::from_secs(60))
            .await;

        let pending = waiter.list_pending().await;
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].id, second.id);
        assert_eq!(pending[1].id, first.id);
    }

    #[tokio::test]
    async fn test_cleanup_expired_sweeps() {
        let waiter = waiter();
        // Zero timeout: already expired, but with a long-armed timer the
        // sweep is what catches it.
        let (_request, rx) = waiter
            .register("a", CommandTier::Yellow, "r", "u1", Duration::from_secs(0))
            .await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        // The zero-duration timer may have fired already; either path must
        // leave the map empty and the requester resolved.
        waiter.cleanup_expired().await;
        assert!(waiter.list_pending().await.is_empty());
        assert!(matches!(rx.await.unwrap(), Err(GatewayError::ApprovalTimeout)));
    }

    struct CountingCallback {
        requests: AtomicU32,
        resolutions: AtomicU32,
    }

    #[async_trait]
    impl ApprovalCallback for CountingCallback {
        async fn on_request(&self, _request: &ApprovalRequest) -> anyhow::Result<()> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn on_resolved(
            &self,
            _request: &ApprovalRequest,
            _status: ApprovalStatus,
        ) -> anyhow::Result<()> {
            self.resolutions.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_callback_notified() {
        let callback = Arc::new(CountingCallback {
            requests: AtomicU32::new(0),
            resolutions: AtomicU32::new(0),
        });
        let waiter = Arc::new(
            ApprovalWaiter::new(Duration::from_secs(300)).with_callback(callback.clone()),
        );

        let waiter_clone = waiter.clone();
        let handle = tokio::spawn(async move {
            waiter_clone
                .request("rm x", CommandTier::Yellow, "risky", "u1")
                .await
        });

        // Wait for the request to land in the pending map.
        let id = loop {
            let pending = waiter.list_pending().await;
            if let Some(request) = pending.first() {
                break request.id.clone();
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };

        waiter.approve(&id, "admin").await.unwrap();
        let grant = handle.await.unwrap().unwrap();
        assert!(grant.approved);
        assert_eq!(callback.requests.load(Ordering::SeqCst), 1);
        assert_eq!(callback.resolutions.load(Ordering::SeqCst), 1);
    }
}

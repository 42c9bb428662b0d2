//! Sandbox capability for Shellgate command execution.
//!
//! The gateway depends only on the two traits in this crate: a
//! [`SandboxProvider`] that creates isolated execution environments on
//! demand, and the opaque [`SandboxHandle`] it returns, which can run
//! commands and be paused or killed. Cloud providers implement these traits
//! out of tree; [`local::LocalProcessProvider`] ships here for tests and
//! single-host deployments.

pub mod error;
pub mod local;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub use error::SandboxError;
pub use local::LocalProcessProvider;

/// Output of one command run inside a sandbox.
#[derive(Debug, Clone)]
pub struct RunOutput {
    /// Process exit code (0 = success).
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

/// An isolated execution environment owned by a single user.
///
/// Handles are opaque to the gateway: it only runs commands against them
/// and drives their lifecycle through `pause`/`kill`.
#[async_trait]
pub trait SandboxHandle: Send + Sync {
    /// Provider-assigned identifier for this sandbox.
    fn id(&self) -> &str;

    /// Run a shell command, bounded by `timeout`.
    async fn run(&self, command: &str, timeout: Duration) -> Result<RunOutput, SandboxError>;

    /// Suspend the sandbox, keeping its state recoverable.
    async fn pause(&self) -> Result<(), SandboxError>;

    /// Destroy the sandbox. Idempotent.
    async fn kill(&self) -> Result<(), SandboxError>;
}

/// Factory for per-user sandboxes.
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    /// Create a fresh sandbox for `user_id`.
    ///
    /// `api_key` carries the provider credential resolved by the gateway
    /// from configuration or environment; providers that need no credential
    /// ignore it.
    async fn create(
        &self,
        user_id: &str,
        api_key: Option<&str>,
    ) -> Result<Arc<dyn SandboxHandle>, SandboxError>;
}

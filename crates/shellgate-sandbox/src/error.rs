//! Error types for sandbox providers.

use thiserror::Error;

/// Errors surfaced by sandbox providers and handles.
///
/// The gateway never propagates these to agents directly; the sandbox
/// manager converts them into structured failure results.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Sandbox creation failed: {0}")]
    CreateFailed(String),

    #[error("Command execution failed: {0}")]
    ExecFailed(String),

    #[error("Command timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Sandbox operation not supported: {0}")]
    Unsupported(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

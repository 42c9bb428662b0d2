//! Error types for the gateway.
//!
//! Every error the gateway can surface to a caller falls into one of the
//! kinds below; the RPC layer serializes them as `{code, message}` so the
//! dashboard can match on codes rather than message text.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Gateway error taxonomy.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Caller supplied missing or malformed input. Never retried.
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    /// Platform user not permitted to execute commands.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Transient denial; carries the wait hint.
    #[error("Rate limit exceeded, retry in {retry_after_ms}ms")]
    RateLimited { retry_after_ms: i64 },

    /// Command classified as block, or output contained secrets in block mode.
    #[error("Blocked by policy: {0}")]
    BlockedByPolicy(String),

    #[error("Approval request timed out")]
    ApprovalTimeout,

    #[error("Approval request rejected: {}", reason.as_deref().unwrap_or("no reason given"))]
    ApprovalRejected { reason: Option<String> },

    /// Provider create/exec/pause/kill failed.
    #[error("Sandbox unavailable: {0}")]
    SandboxUnavailable(String),

    #[error("{0} not found")]
    NotFound(String),

    /// Uncategorized; the original error is always logged at the raise site.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Stable machine-readable code for the RPC surface.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidParams(_) => ErrorCode::InvalidParams,
            Self::Unauthorized(_) => ErrorCode::Unauthorized,
            Self::RateLimited { .. } => ErrorCode::RateLimited,
            Self::BlockedByPolicy(_) => ErrorCode::BlockedByPolicy,
            Self::ApprovalTimeout => ErrorCode::ApprovalTimeout,
            Self::ApprovalRejected { .. } => ErrorCode::ApprovalRejected,
            Self::SandboxUnavailable(_) => ErrorCode::SandboxUnavailable,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::Internal(_) => ErrorCode::InternalError,
        }
    }
}

/// Wire-level error codes, one per [`GatewayError`] kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidParams,
    Unauthorized,
    RateLimited,
    BlockedByPolicy,
    ApprovalTimeout,
    ApprovalRejected,
    SandboxUnavailable,
    NotFound,
    InternalError,
}

/// Result alias for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

//! Hook pipeline event models.
//!
//! Events are owned tagged values rather than loose JSON maps: a subscriber
//! can inspect the tool name and parameters without downcasting, and the
//! pipeline controls exactly what flows downstream after each hook.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool invocation as seen by the hook pipeline.
///
/// Before hooks see `result`/`error` unset; after hooks see them filled in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallEvent {
    pub tool_name: String,
    pub params: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl ToolCallEvent {
    /// Event for a call that has not executed yet.
    pub fn before(tool_name: impl Into<String>, params: Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            params,
            result: None,
            error: None,
            duration_ms: None,
        }
    }

    /// Event carrying the result of an executed call.
    pub fn after(
        tool_name: impl Into<String>,
        params: Value,
        result: Option<Value>,
        error: Option<String>,
        duration_ms: Option<u64>,
    ) -> Self {
        Self {
            tool_name: tool_name.into(),
            params,
            result,
            error,
            duration_ms,
        }
    }
}

/// Identity attached to a tool call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HookContext {
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub platform_user_id: Option<String>,
    #[serde(default)]
    pub session_key: Option<String>,
}

impl HookContext {
    pub fn for_user(user_id: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            channel_id: Some(channel_id.into()),
            ..Default::default()
        }
    }
}

/// What a subscriber wants done with the call.
#[derive(Debug, Clone)]
pub enum HookOutcome {
    /// No opinion; the pipeline continues unchanged.
    Pass,
    /// Short-circuit: the call does not execute (before) or its result is
    /// replaced with a block response (after).
    Block { reason: String },
    /// Replace the parameters seen by downstream hooks and the execution.
    /// Only meaningful in before hooks.
    Mutate { params: Value },
}

impl HookOutcome {
    pub fn block(reason: impl Into<String>) -> Self {
        Self::Block {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_before_event_has_no_result() {
        let event = ToolCallEvent::before("Shell", serde_json::json!({"command": "ls"}));
        assert!(event.result.is_none());
        assert!(event.duration_ms.is_none());
    }

    #[test]
    fn test_context_for_user() {
        let ctx = HookContext::for_user("u1", "c1");
        assert_eq!(ctx.user_id.as_deref(), Some("u1"));
        assert!(ctx.agent_id.is_none());
    }

    #[test]
    fn test_event_roundtrip() {
        let event = ToolCallEvent::after(
            "Shell",
            serde_json::json!({"command": "ls"}),
            Some(Value::String("ok".into())),
            None,
            Some(12),
        );
        let json = serde_json::to_string(&event).unwrap();
        let parsed: ToolCallEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.duration_ms, Some(12));
        assert_eq!(parsed.tool_name, "Shell");
    }
}

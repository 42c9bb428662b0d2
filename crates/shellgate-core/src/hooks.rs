//! Tool-call hook pipeline.
//!
//! Two events wrap every tool call: `before_tool_call` runs to completion
//! before the tool executes, `after_tool_call` observes the result. Multiple
//! subscribers register per event with an integer priority; invocation is
//! highest-priority first and stable for ties. A before hook can block the
//! call or replace its parameters; an after hook can block the result.
//! Subscriber failures never propagate: a hook that returns an error is
//! logged and treated as a pass.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, RwLock};
use tracing::warn;

use crate::models::{HookContext, HookOutcome, ToolCallEvent};

/// Subscriber invoked before a tool call executes.
#[async_trait]
pub trait BeforeHook: Send + Sync {
    fn name(&self) -> &str;

    async fn on_before(
        &self,
        event: &ToolCallEvent,
        ctx: &HookContext,
    ) -> anyhow::Result<HookOutcome>;
}

/// Subscriber invoked after a tool call completes.
#[async_trait]
pub trait AfterHook: Send + Sync {
    fn name(&self) -> &str;

    async fn on_after(
        &self,
        event: &ToolCallEvent,
        ctx: &HookContext,
    ) -> anyhow::Result<HookOutcome>;
}

/// Outcome of running the before chain.
#[derive(Debug, Clone)]
pub enum BeforeResult {
    /// Execute the call with these (possibly rewritten) parameters.
    Proceed { params: Value },
    /// Do not execute; hand the reason back to the agent.
    Blocked { reason: String },
}

/// Outcome of running the after chain.
#[derive(Debug, Clone)]
pub enum AfterResult {
    /// Deliver the tool result unchanged.
    Unchanged,
    /// Replace the result with a block response.
    Blocked { reason: String },
}

struct Registered<T: ?Sized> {
    priority: i32,
    hook: Arc<T>,
}

/// The pipeline. Registration is cheap and infrequent; dispatch snapshots
/// the subscriber list so hooks never run under the registry lock.
#[derive(Default)]
pub struct HookPipeline {
    before: RwLock<Vec<Registered<dyn BeforeHook>>>,
    after: RwLock<Vec<Registered<dyn AfterHook>>>,
}

impl HookPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_before(&self, priority: i32, hook: Arc<dyn BeforeHook>) {
        let mut before = self.before.write().expect("hook registry lock");
        before.push(Registered { priority, hook });
        // Stable sort keeps registration order for equal priorities.
        before.sort_by_key(|registered| std::cmp::Reverse(registered.priority));
    }

    pub fn register_after(&self, priority: i32, hook: Arc<dyn AfterHook>) {
        let mut after = self.after.write().expect("hook registry lock");
        after.push(Registered { priority, hook });
        after.sort_by_key(|registered| std::cmp::Reverse(registered.priority));
    }

    /// Run the before chain. Parameter rewrites compose; the first block
    /// short-circuits the remaining subscribers.
    pub async fn run_before(&self, mut event: ToolCallEvent, ctx: &HookContext) -> BeforeResult {
        let hooks: Vec<(String, Arc<dyn BeforeHook>)> = {
            let before = self.before.read().expect("hook registry lock");
            before
                .iter()
                .map(|registered| (registered.hook.name().to_string(), registered.hook.clone()))
                .collect()
        };

        for (name, hook) in hooks {
            match hook.on_before(&event, ctx).await {
                Ok(HookOutcome::Pass) => {}
                Ok(HookOutcome::Block { reason }) => {
                    return BeforeResult::Blocked { reason };
                }
                Ok(HookOutcome::Mutate { params }) => {
                    event.params = params;
                }
                Err(error) => {
                    warn!(hook = %name, error = %error, "Before hook failed; treating as pass");
                }
            }
        }

        BeforeResult::Proceed {
            params: event.params,
        }
    }

    /// Run the after chain. The first block wins; mutation outcomes are
    /// meaningless here and ignored.
    pub async fn run_after(&self, event: &ToolCallEvent, ctx: &HookContext) -> AfterResult {
        let hooks: Vec<(String, Arc<dyn AfterHook>)> = {
            let after = self.after.read().expect("hook registry lock");
            after
                .iter()
                .map(|registered| (registered.hook.name().to_string(), registered.hook.clone()))
                .collect()
        };

        for (name, hook) in hooks {
            match hook.on_after(event, ctx).await {
                Ok(HookOutcome::Pass) | Ok(HookOutcome::Mutate { .. }) => {}
                Ok(HookOutcome::Block { reason }) => {
                    return AfterResult::Blocked { reason };
                }
                Err(error) => {
                    warn!(hook = %name, error = %error, "After hook failed; treating as pass");
                }
            }
        }

        AfterResult::Unchanged
    }

    pub fn before_len(&self) -> usize {
        self.before.read().expect("hook registry lock").len()
    }

    pub fn after_len(&self) -> usize {
        self.after.read().expect("hook registry lock").len()
    }
}

//! Tool-call interception events.
//!
//! The host may register callbacks that observe and rewrite each tool
//! invocation. For one invocation the order is fixed: the before-callback
//! runs before any handler work, then exactly one of the success or error
//! callbacks runs, and both complete before the guest-side promise settles.
//!
//! Callbacks mutate the event records in place:
//! - [`BeforeToolCall`]: overwrite `args`, or set `return_value` to skip the
//!   handler entirely.
//! - [`ToolCallSuccess`]: overwrite `result`.
//! - [`ToolCallError`]: set `result` to convert the failure into a success.
//!
//! A callback returning `Err` rejects the guest promise with that message.

use std::sync::Arc;

use anyhow::Result;
use serde_json::Value;

/// Assembled before a tool handler is consulted.
#[derive(Debug, Clone)]
pub struct BeforeToolCall {
    pub tool_name: String,
    pub args: Value,
    /// When set by the callback, the handler is skipped and this value is
    /// treated as the handler's result.
    pub return_value: Option<Value>,
}

/// Assembled after a handler (or a short-circuit) produced a value.
#[derive(Debug, Clone)]
pub struct ToolCallSuccess {
    pub tool_name: String,
    pub args: Value,
    pub result: Value,
}

/// Assembled after a handler rejected.
#[derive(Debug, Clone)]
pub struct ToolCallError {
    pub tool_name: String,
    pub args: Value,
    pub error: String,
    /// When set by the callback, the guest promise resolves to this value
    /// instead of rejecting.
    pub result: Option<Value>,
}

pub type BeforeToolCallFn = Arc<dyn Fn(&mut BeforeToolCall) -> Result<()> + Send + Sync>;
pub type ToolCallSuccessFn = Arc<dyn Fn(&mut ToolCallSuccess) -> Result<()> + Send + Sync>;
pub type ToolCallErrorFn = Arc<dyn Fn(&mut ToolCallError) -> Result<()> + Send + Sync>;

/// Optional host interception callbacks, shared across all tool calls of a
/// sandbox.
#[derive(Clone, Default)]
pub struct EventCallbacks {
    pub on_before_tool_call: Option<BeforeToolCallFn>,
    pub on_tool_call_success: Option<ToolCallSuccessFn>,
    pub on_tool_call_error: Option<ToolCallErrorFn>,
}

impl EventCallbacks {
    pub fn with_before(
        mut self,
        callback: impl Fn(&mut BeforeToolCall) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.on_before_tool_call = Some(Arc::new(callback));
        self
    }

    pub fn with_success(
        mut self,
        callback: impl Fn(&mut ToolCallSuccess) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.on_tool_call_success = Some(Arc::new(callback));
        self
    }

    pub fn with_error(
        mut self,
        callback: impl Fn(&mut ToolCallError) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.on_tool_call_error = Some(Arc::new(callback));
        self
    }
}

impl std::fmt::Debug for EventCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventCallbacks")
            .field("on_before_tool_call", &self.on_before_tool_call.is_some())
            .field("on_tool_call_success", &self.on_tool_call_success.is_some())
            .field("on_tool_call_error", &self.on_tool_call_error.is_some())
            .finish()
    }
}

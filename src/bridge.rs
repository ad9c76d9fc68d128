//! Host↔guest tool bridge.
//!
//! The guest-facing half is a small prelude: `tool(name, args)` hands the
//! call to a native enqueue function and returns a fresh promise whose
//! resolver is parked in a pending map keyed by call id. The host-facing
//! half runs the event pipeline and the tool handler on the async scheduler
//! and reports a [`ToolCompletion`] back to the engine, which delivers
//! resolutions into the guest strictly in arrival order.

use serde_json::Value;

use crate::events::{BeforeToolCall, EventCallbacks, ToolCallError, ToolCallSuccess};
use crate::types::Tool;

/// Name of the native enqueue function installed by the engine.
pub(crate) const TOOL_ENQUEUE_FN: &str = "__host_tool_call";

/// Name of the guest-side settle function the engine invokes to resolve or
/// reject a parked tool promise.
pub(crate) const TOOL_SETTLE_FN: &str = "__settle_tool_call";

/// Guest prelude installing `tool()` and the pending-promise map.
///
/// The enqueue native returns a call id synchronously; the promise handle is
/// returned to guest code before any host work runs.
pub(crate) const BRIDGE_PRELUDE: &str = r#"
(() => {
    const pending = new Map();
    globalThis.__settle_tool_call = (id, ok, value) => {
        const entry = pending.get(id);
        if (entry === undefined) {
            return;
        }
        pending.delete(id);
        if (ok) {
            entry.resolve(value);
        } else {
            entry.reject(new Error(value));
        }
    };
    globalThis.tool = (name, args) => {
        const id = __host_tool_call(String(name), args);
        return new Promise((resolve, reject) => {
            pending.set(id, { resolve, reject });
        });
    };
})();
"#;

/// A guest `tool()` invocation waiting to be spawned on the host scheduler.
#[derive(Debug)]
pub(crate) struct PendingCall {
    pub call_id: String,
    pub name: String,
    pub args: Value,
}

/// Outcome of one host-side tool task, queued for FIFO delivery.
#[derive(Debug)]
pub(crate) struct ToolCompletion {
    pub call_id: String,
    pub outcome: Result<Value, String>,
}

/// Run one tool invocation through the event pipeline.
///
/// `tool` is the registry snapshot taken at bridge-call time; an absent tool
/// rejects before any callback runs. Blob lifting happens later, at delivery
/// time, so callbacks observe the raw payload.
pub(crate) async fn run_tool_call(
    tool: Option<Tool>,
    name: String,
    args: Value,
    callbacks: &EventCallbacks,
) -> Result<Value, String> {
    let Some(tool) = tool else {
        return Err(format!("Tool not found: {name}"));
    };

    let mut before = BeforeToolCall {
        tool_name: name.clone(),
        args,
        return_value: None,
    };
    if let Some(callback) = &callbacks.on_before_tool_call {
        callback(&mut before).map_err(|err| err.to_string())?;
    }
    let args = before.args;

    let outcome = match before.return_value {
        Some(short_circuit) => Ok(short_circuit),
        None => (tool.handler)(args.clone())
            .await
            .map_err(|err| err.to_string()),
    };

    match outcome {
        Ok(result) => {
            let mut event = ToolCallSuccess {
                tool_name: name,
                args,
                result,
            };
            if let Some(callback) = &callbacks.on_tool_call_success {
                callback(&mut event).map_err(|err| err.to_string())?;
            }
            Ok(event.result)
        }
        Err(error) => {
            let mut event = ToolCallError {
                tool_name: name,
                args,
                error,
                result: None,
            };
            if let Some(callback) = &callbacks.on_tool_call_error {
                callback(&mut event).map_err(|err| err.to_string())?;
            }
            match event.result {
                Some(recovered) => Ok(recovered),
                None => Err(event.error),
            }
        }
    }
}

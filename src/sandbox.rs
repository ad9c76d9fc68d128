//! Sandbox facade.
//!
//! A [`Sandbox`] is the long-lived host object bundling the tool registry,
//! the persistent store, the previous execution's return value, and the
//! `execute` tool it exposes to the outside world. Executions run one at a
//! time; the store is only touched by the guest during an execution and by
//! the host between executions.

use std::sync::Arc;

use anyhow::Result;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Map, Value};

use crate::blobs::BlobTable;
use crate::engine;
use crate::events::EventCallbacks;
use crate::registry::{self, ToolRegistry};
use crate::types::{ExecuteResult, SandboxConfig, Tool};

/// Options for [`Sandbox::create`].
#[derive(Default)]
pub struct SandboxOptions {
    pub tools: Vec<Tool>,
    /// Initial persistent store contents.
    pub store: Map<String, Value>,
    pub callbacks: EventCallbacks,
    pub config: SandboxConfig,
}

impl SandboxOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tool(mut self, tool: Tool) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn with_tools(mut self, tools: impl IntoIterator<Item = Tool>) -> Self {
        self.tools.extend(tools);
        self
    }

    pub fn with_store(mut self, store: Map<String, Value>) -> Self {
        self.store = store;
        self
    }

    pub fn with_callbacks(mut self, callbacks: EventCallbacks) -> Self {
        self.callbacks = callbacks;
        self
    }

    pub fn with_config(mut self, config: SandboxConfig) -> Self {
        self.config = config;
        self
    }
}

/// Shared state behind a [`Sandbox`] handle.
pub(crate) struct SandboxState {
    pub registry: Arc<RwLock<ToolRegistry>>,
    /// Current execution's blob table; cleared when an execution starts.
    pub blobs: Arc<Mutex<BlobTable>>,
    pub callbacks: EventCallbacks,
    pub config: SandboxConfig,
    pub store: Mutex<Map<String, Value>>,
    pub prev_result: Mutex<Value>,
    /// Serialises executions: one fresh VM at a time per sandbox.
    pub exec_lock: tokio::sync::Mutex<()>,
}

/// Long-lived sandbox handle. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Sandbox {
    state: Arc<SandboxState>,
}

impl std::fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sandbox").finish_non_exhaustive()
    }
}

/// Build a sandbox from options. Fails on duplicate or reserved tool names.
pub fn create_sandbox(options: SandboxOptions) -> Result<Sandbox> {
    Sandbox::create(options)
}

impl Sandbox {
    pub fn create(options: SandboxOptions) -> Result<Self> {
        let registry = Arc::new(RwLock::new(ToolRegistry::from_tools(options.tools)?));
        let blobs = Arc::new(Mutex::new(BlobTable::new()));
        registry::install_built_ins(&registry, &blobs)?;

        Ok(Self {
            state: Arc::new(SandboxState {
                registry,
                blobs,
                callbacks: options.callbacks,
                config: options.config,
                store: Mutex::new(options.store),
                prev_result: Mutex::new(Value::Null),
                exec_lock: tokio::sync::Mutex::new(()),
            }),
        })
    }

    /// Run one guest program. Never returns an error: every failure is
    /// reported inside the [`ExecuteResult`].
    pub async fn execute(&self, code: &str) -> ExecuteResult {
        let _guard = self.state.exec_lock.lock().await;
        engine::run_execution(&self.state, code).await
    }

    /// Register an additional tool. Not visible to an in-flight execution's
    /// already-dispatched calls; lookups happen at bridge-call time.
    pub fn add_tool(&self, tool: Tool) -> Result<()> {
        self.state.registry.write().add(tool)
    }

    /// Remove a user tool by name.
    pub fn remove_tool(&self, name: &str) -> Result<()> {
        self.state.registry.write().remove(name).map(|_| ())
    }

    /// The persistent store as of the last completed execution.
    pub fn store(&self) -> Map<String, Value> {
        self.state.store.lock().clone()
    }

    /// Replace the whole store mapping.
    pub fn set_store(&self, store: Map<String, Value>) {
        *self.state.store.lock() = store;
    }

    /// The previous execution's return value (JSON null if none yet).
    pub fn prev_result(&self) -> Value {
        self.state.prev_result.lock().clone()
    }

    /// Current description text of the `execute` tool. Recomputed by the
    /// registry on every membership change.
    pub fn execute_description(&self) -> String {
        self.state.registry.read().execute_description().to_string()
    }

    /// Descriptor for the sandbox's `execute` tool, for plugging into a host
    /// tool catalog. The reserved name `execute` never lives inside the
    /// registry itself. The descriptor's description is a snapshot; re-read
    /// [`Self::execute_description`] after registry mutations.
    pub fn execute_tool(&self) -> Tool {
        let sandbox = self.clone();
        Tool::new(
            "execute",
            json!({
                "type": "object",
                "properties": { "code": { "type": "string", "description": "JavaScript source to run" } },
                "required": ["code"],
            }),
            move |args| {
                let sandbox = sandbox.clone();
                async move {
                    let code = args
                        .get("code")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    let result = sandbox.execute(&code).await;
                    Ok(serde_json::to_value(result)?)
                }
            },
        )
        .with_description(self.execute_description())
        .with_output_schema(json!({
            "type": "object",
            "properties": {
                "success": { "type": "boolean" },
                "result": {},
                "error": { "type": "string" },
                "blobs": { "type": "array" },
            },
            "required": ["success", "blobs"],
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_tool(name: &str) -> Tool {
        Tool::new(name, json!({ "type": "object", "properties": {} }), |_| async {
            Ok(Value::Null)
        })
    }

    #[test]
    fn test_create_rejects_duplicate_names() {
        let options = SandboxOptions::new()
            .with_tool(noop_tool("twin"))
            .with_tool(noop_tool("twin"));
        let err = create_sandbox(options).unwrap_err();
        assert_eq!(err.to_string(), "Duplicate tool name: twin");
    }

    #[test]
    fn test_add_and_remove_refresh_execute_description() {
        let sandbox = create_sandbox(SandboxOptions::new()).unwrap();
        assert!(!sandbox.execute_description().contains("weather"));

        sandbox.add_tool(noop_tool("weather")).unwrap();
        assert!(sandbox.execute_description().contains("weather"));

        sandbox.remove_tool("weather").unwrap();
        assert!(!sandbox.execute_description().contains("weather"));
    }

    #[test]
    fn test_add_tool_duplicate_and_remove_unknown() {
        let sandbox = create_sandbox(SandboxOptions::new().with_tool(noop_tool("one"))).unwrap();

        let err = sandbox.add_tool(noop_tool("one")).unwrap_err();
        assert_eq!(err.to_string(), "Duplicate tool name: one");

        let err = sandbox.remove_tool("ghost").unwrap_err();
        assert_eq!(err.to_string(), "Tool not found: ghost");
    }

    #[test]
    fn test_store_replacement() {
        let sandbox = create_sandbox(SandboxOptions::new()).unwrap();
        let mut store = Map::new();
        store.insert("k".to_string(), json!([1, 2, 3]));
        sandbox.set_store(store.clone());
        assert_eq!(sandbox.store(), store);
    }

    #[test]
    fn test_execute_tool_descriptor_shape() {
        let sandbox = create_sandbox(SandboxOptions::new()).unwrap();
        let tool = sandbox.execute_tool();
        assert_eq!(tool.name, "execute");
        assert_eq!(tool.input_schema["required"], json!(["code"]));
        assert_eq!(
            tool.output_schema.as_ref().unwrap()["required"],
            json!(["success", "blobs"])
        );
    }
}

//! Tool registry and built-in tools.
//!
//! An ordered catalog of [`Tool`]s with a uniqueness invariant on `name`.
//! Construction appends the four built-ins (`describe_tool`, `list_tools`,
//! `sleep`, `get_blob`) after the user tools. The name `execute` is reserved
//! for the sandbox's exposed tool and never lives inside the registry.
//!
//! The registry also renders the human-readable description of the `execute`
//! tool; the text embeds the sorted tool-name list and is recomputed on
//! every mutation.

use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::{bail, Result};
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};

use crate::blobs::BlobTable;
use crate::types::Tool;

/// Names user tools may not take: the sandbox's own tool plus the built-ins.
pub const RESERVED_TOOL_NAMES: &[&str] =
    &["execute", "describe_tool", "list_tools", "sleep", "get_blob"];

const BUILT_IN_NAMES: &[&str] = &["describe_tool", "list_tools", "sleep", "get_blob"];

/// Ordered, name-unique tool catalog.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: Vec<Tool>,
    execute_description: String,
}

impl ToolRegistry {
    /// Build a registry from user tools, validating names. Built-ins are
    /// appended separately via [`install_built_ins`].
    pub(crate) fn from_tools(tools: Vec<Tool>) -> Result<Self> {
        let mut registry = Self::default();
        for tool in tools {
            registry.add(tool)?;
        }
        Ok(registry)
    }

    /// Append a user tool. Fails on any name collision, including attempts
    /// to reuse a reserved name.
    pub fn add(&mut self, tool: Tool) -> Result<()> {
        if RESERVED_TOOL_NAMES.contains(&tool.name.as_str()) {
            bail!("Duplicate tool name: {}", tool.name);
        }
        self.add_built_in(tool)
    }

    /// Append without the reserved-name guard; install_built_ins only.
    fn add_built_in(&mut self, tool: Tool) -> Result<()> {
        validate_tool(&tool)?;
        if self.find(&tool.name).is_some() {
            bail!("Duplicate tool name: {}", tool.name);
        }
        self.tools.push(tool);
        self.refresh_execute_description();
        Ok(())
    }

    /// Remove a user tool by name.
    pub fn remove(&mut self, name: &str) -> Result<Tool> {
        if BUILT_IN_NAMES.contains(&name) {
            bail!("Cannot remove built-in tool: {name}");
        }
        let Some(index) = self.tools.iter().position(|tool| tool.name == name) else {
            bail!("Tool not found: {name}");
        };
        let removed = self.tools.remove(index);
        self.refresh_execute_description();
        Ok(removed)
    }

    pub fn find(&self, name: &str) -> Option<&Tool> {
        self.tools.iter().find(|tool| tool.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tool> {
        self.tools.iter()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Current description text for the sandbox's `execute` tool.
    pub fn execute_description(&self) -> &str {
        &self.execute_description
    }

    fn refresh_execute_description(&mut self) {
        let mut names: Vec<&str> = self.tools.iter().map(|tool| tool.name.as_str()).collect();
        names.sort_unstable();
        self.execute_description = format!(
            "Execute JavaScript code in a secure sandbox. The code runs as the body of an \
             async function: use `return` to produce a result and `await tool(name, args)` \
             to call tools. Available tools: {}. A mutable `store` object persists JSON \
             state across executions; the read-only `store._prev` holds the previous \
             execution's return value. Limitations: no filesystem, network, module loading \
             or timers (use tool('sleep', {{ms}}) to wait), and oversized results are \
             flagged as truncated.",
            names.join(", ")
        );
    }
}

fn validate_tool(tool: &Tool) -> Result<()> {
    if tool.name.is_empty() {
        bail!("Tool name must not be empty");
    }
    if tool.input_schema.get("type").and_then(Value::as_str) != Some("object") {
        bail!("Tool input schema must be object-typed: {}", tool.name);
    }
    Ok(())
}

// =============================================================================
// Built-in tools
// =============================================================================

/// Append the four built-in tools to a freshly constructed registry.
///
/// The handlers hold weak references back to the registry and the blob table
/// so the registry owning them does not keep itself alive.
pub(crate) fn install_built_ins(
    registry: &Arc<RwLock<ToolRegistry>>,
    blobs: &Arc<Mutex<BlobTable>>,
) -> Result<()> {
    let built_ins = [
        describe_tool(Arc::downgrade(registry)),
        list_tools(Arc::downgrade(registry)),
        sleep(),
        get_blob(Arc::downgrade(blobs)),
    ];
    let mut guard = registry.write();
    for tool in built_ins {
        guard.add_built_in(tool)?;
    }
    Ok(())
}

fn describe_tool(registry: Weak<RwLock<ToolRegistry>>) -> Tool {
    Tool::new(
        "describe_tool",
        json!({
            "type": "object",
            "properties": { "name": { "type": "string", "description": "Tool name" } },
            "required": ["name"],
        }),
        move |args| {
            let registry = registry.clone();
            async move {
                let name = args
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let description = registry.upgrade().and_then(|registry| {
                    let guard = registry.read();
                    guard.find(&name).map(|tool| {
                        json!({
                            "name": tool.name,
                            "description": tool.description,
                            "inputSchema": tool.input_schema,
                            "outputSchema": tool.output_schema,
                        })
                    })
                });
                // Never rejects: unknown names report in-band.
                Ok(description.unwrap_or_else(|| json!({ "error": format!("Tool not found: {name}") })))
            }
        },
    )
    .with_description("Describe a registered tool, including its input and output schemas")
}

fn list_tools(registry: Weak<RwLock<ToolRegistry>>) -> Tool {
    Tool::new(
        "list_tools",
        json!({ "type": "object", "properties": {} }),
        move |_args| {
            let registry = registry.clone();
            async move {
                let tools = registry
                    .upgrade()
                    .map(|registry| {
                        registry
                            .read()
                            .iter()
                            .map(|tool| json!({ "name": tool.name, "description": tool.description }))
                            .collect::<Vec<_>>()
                    })
                    .unwrap_or_default();
                Ok(Value::Array(tools))
            }
        },
    )
    .with_description("List every registered tool with its description")
}

fn sleep() -> Tool {
    Tool::new(
        "sleep",
        json!({
            "type": "object",
            "properties": { "ms": { "type": "number", "description": "Milliseconds to sleep" } },
            "required": ["ms"],
        }),
        |args| async move {
            let ms = args.get("ms").cloned().unwrap_or_else(|| json!(0));
            let duration_ms = ms.as_f64().filter(|v| v.is_finite() && *v >= 0.0).unwrap_or(0.0);
            tokio::time::sleep(Duration::from_millis(duration_ms as u64)).await;
            Ok(json!({ "slept": ms }))
        },
    )
    .with_description("Resolve after approximately `ms` milliseconds")
}

fn get_blob(blobs: Weak<Mutex<BlobTable>>) -> Tool {
    Tool::new(
        "get_blob",
        json!({
            "type": "object",
            "properties": { "id": { "type": "string", "description": "Blob id" } },
            "required": ["id"],
        }),
        move |args| {
            let blobs = blobs.clone();
            async move {
                let id = args
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let blob = blobs
                    .upgrade()
                    .and_then(|table| table.lock().get(&id).cloned());
                match blob {
                    Some(blob) => Ok(serde_json::to_value(blob)?),
                    None => Ok(json!({ "error": format!("Blob not found: {id}") })),
                }
            }
        },
    )
    .with_description("Fetch a blob lifted out of a tool result during this execution")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_tool(name: &str) -> Tool {
        Tool::new(name, json!({ "type": "object", "properties": {} }), |_| async {
            Ok(Value::Null)
        })
    }

    fn registry_with_built_ins(user: Vec<Tool>) -> Result<Arc<RwLock<ToolRegistry>>> {
        let registry = Arc::new(RwLock::new(ToolRegistry::from_tools(user)?));
        let blobs = Arc::new(Mutex::new(BlobTable::new()));
        install_built_ins(&registry, &blobs)?;
        Ok(registry)
    }

    #[test]
    fn test_built_ins_appended_after_user_tools() {
        let registry = registry_with_built_ins(vec![noop_tool("zeta"), noop_tool("alpha")]).unwrap();
        let names: Vec<String> = registry.read().iter().map(|t| t.name.clone()).collect();
        assert_eq!(
            names,
            ["zeta", "alpha", "describe_tool", "list_tools", "sleep", "get_blob"]
        );
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let err = ToolRegistry::from_tools(vec![noop_tool("dup"), noop_tool("dup")]).unwrap_err();
        assert_eq!(err.to_string(), "Duplicate tool name: dup");
    }

    #[test]
    fn test_reserved_names_rejected_for_user_tools() {
        for name in RESERVED_TOOL_NAMES {
            let err = ToolRegistry::from_tools(vec![noop_tool(name)]).unwrap_err();
            assert_eq!(err.to_string(), format!("Duplicate tool name: {name}"));
        }
    }

    #[test]
    fn test_remove_unknown_tool() {
        let mut registry = ToolRegistry::from_tools(vec![]).unwrap();
        let err = registry.remove("ghost").unwrap_err();
        assert_eq!(err.to_string(), "Tool not found: ghost");
    }

    #[test]
    fn test_remove_built_in_rejected() {
        let registry = registry_with_built_ins(vec![]).unwrap();
        let err = registry.write().remove("sleep").unwrap_err();
        assert_eq!(err.to_string(), "Cannot remove built-in tool: sleep");
    }

    #[test]
    fn test_non_object_schema_rejected() {
        let tool = Tool::new("bad", json!({ "type": "string" }), |_| async { Ok(Value::Null) });
        let err = ToolRegistry::from_tools(vec![tool]).unwrap_err();
        assert!(err.to_string().contains("object-typed"));
    }

    #[test]
    fn test_execute_description_tracks_membership() {
        let registry = registry_with_built_ins(vec![noop_tool("weather")]).unwrap();
        {
            let guard = registry.read();
            let description = guard.execute_description();
            assert!(description
                .contains("describe_tool, get_blob, list_tools, sleep, weather"));
        }

        registry.write().add(noop_tool("add")).unwrap();
        assert!(registry
            .read()
            .execute_description()
            .contains("add, describe_tool, get_blob, list_tools, sleep, weather"));

        registry.write().remove("weather").unwrap();
        let guard = registry.read();
        let description = guard.execute_description();
        assert!(!description.contains("weather"));
        assert!(description.contains("tool('sleep', {ms})"));
    }

    #[tokio::test]
    async fn test_describe_tool_reports_unknown_in_band() {
        let registry = registry_with_built_ins(vec![]).unwrap();
        let tool = registry.read().find("describe_tool").cloned().unwrap();
        let result = (tool.handler)(json!({ "name": "ghost" })).await.unwrap();
        assert_eq!(result, json!({ "error": "Tool not found: ghost" }));
    }

    #[tokio::test]
    async fn test_list_tools_includes_built_ins() {
        let registry = registry_with_built_ins(vec![noop_tool("echo")]).unwrap();
        let tool = registry.read().find("list_tools").cloned().unwrap();
        let result = (tool.handler)(json!({})).await.unwrap();
        let names: Vec<&str> = result
            .as_array()
            .unwrap()
            .iter()
            .map(|entry| entry["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, ["echo", "describe_tool", "list_tools", "sleep", "get_blob"]);
    }

    #[tokio::test]
    async fn test_sleep_echoes_duration() {
        let tool = sleep();
        let result = (tool.handler)(json!({ "ms": 5 })).await.unwrap();
        assert_eq!(result, json!({ "slept": 5 }));
    }

    #[tokio::test]
    async fn test_get_blob_outside_execution_is_empty() {
        let registry = registry_with_built_ins(vec![]).unwrap();
        let tool = registry.read().find("get_blob").cloned().unwrap();
        let result = (tool.handler)(json!({ "id": "blob_aaaaaa" })).await.unwrap();
        assert_eq!(result, json!({ "error": "Blob not found: blob_aaaaaa" }));
    }
}

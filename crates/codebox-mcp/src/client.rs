//! Stdio catalog client.
//!
//! Spawns a catalog server as a child process and speaks line-delimited
//! JSON-RPC 2.0 over its stdin/stdout, performing the `initialize`
//! handshake up front. Calls are blocking; the adapter runs them on the
//! blocking thread pool.

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, Command, Stdio};

use anyhow::{anyhow, bail, Context, Result};
use serde_json::{json, Value};

use crate::protocol::{
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ReadResourceResult, RemotePromptInfo,
    RemoteResourceInfo, RemoteResourceTemplate, RemoteToolInfo, ToolCallResult,
};

pub struct CatalogClient {
    child: Child,
    reader: BufReader<std::process::ChildStdout>,
    writer: std::process::ChildStdin,
    next_id: u64,
    pub name: String,
}

impl CatalogClient {
    /// Spawn a catalog server process and perform the initialize handshake.
    pub fn spawn(name: &str, command: &str, args: &[String]) -> Result<Self> {
        let mut child = Command::new(command)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to spawn catalog server '{command}'"))?;

        let writer = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("failed to capture catalog server stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("failed to capture catalog server stdout"))?;

        let mut client = Self {
            child,
            reader: BufReader::new(stdout),
            writer,
            next_id: 1,
            name: name.to_string(),
        };
        client.initialize()?;
        Ok(client)
    }

    fn initialize(&mut self) -> Result<()> {
        self.request(
            "initialize",
            Some(json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": { "name": "codebox", "version": env!("CARGO_PKG_VERSION") },
            })),
        )?;
        self.notify("notifications/initialized", None)
    }

    fn request(&mut self, method: &str, params: Option<Value>) -> Result<Value> {
        let id = self.next_id;
        self.next_id += 1;

        let mut line = serde_json::to_string(&JsonRpcRequest::new(id, method, params))?;
        line.push('\n');
        self.writer.write_all(line.as_bytes())?;
        self.writer.flush()?;

        // Skip notifications and unrelated lines until our id answers.
        loop {
            let mut line = String::new();
            let read = self.reader.read_line(&mut line)?;
            if read == 0 {
                bail!("catalog server '{}' closed the connection", self.name);
            }
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Ok(response) = serde_json::from_str::<JsonRpcResponse>(line) else {
                continue;
            };
            if response.id != Some(id) {
                continue;
            }
            if let Some(error) = response.error {
                bail!("{method} failed: {}", error.message);
            }
            return response
                .result
                .ok_or_else(|| anyhow!("{method} returned no result"));
        }
    }

    fn notify(&mut self, method: &str, params: Option<Value>) -> Result<()> {
        let mut line = serde_json::to_string(&JsonRpcNotification::new(method, params))?;
        line.push('\n');
        self.writer.write_all(line.as_bytes())?;
        self.writer.flush()?;
        Ok(())
    }

    fn list(&mut self, method: &str, field: &str) -> Result<Value> {
        let result = self.request(method, None)?;
        result
            .get(field)
            .cloned()
            .ok_or_else(|| anyhow!("{method} result has no '{field}' field"))
    }

    pub fn list_tools(&mut self) -> Result<Vec<RemoteToolInfo>> {
        Ok(serde_json::from_value(self.list("tools/list", "tools")?)?)
    }

    pub fn call_tool(&mut self, name: &str, arguments: Value) -> Result<ToolCallResult> {
        let result = self.request(
            "tools/call",
            Some(json!({ "name": name, "arguments": arguments })),
        )?;
        Ok(serde_json::from_value(result)?)
    }

    pub fn list_prompts(&mut self) -> Result<Vec<RemotePromptInfo>> {
        Ok(serde_json::from_value(self.list("prompts/list", "prompts")?)?)
    }

    pub fn get_prompt(&mut self, name: &str, arguments: Value) -> Result<Value> {
        self.request(
            "prompts/get",
            Some(json!({ "name": name, "arguments": arguments })),
        )
    }

    pub fn list_resources(&mut self) -> Result<Vec<RemoteResourceInfo>> {
        Ok(serde_json::from_value(
            self.list("resources/list", "resources")?,
        )?)
    }

    pub fn list_resource_templates(&mut self) -> Result<Vec<RemoteResourceTemplate>> {
        Ok(serde_json::from_value(self.list(
            "resources/templates/list",
            "resourceTemplates",
        )?)?)
    }

    pub fn read_resource(&mut self, uri: &str) -> Result<ReadResourceResult> {
        let result = self.request("resources/read", Some(json!({ "uri": uri })))?;
        Ok(serde_json::from_value(result)?)
    }
}

impl Drop for CatalogClient {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

//! Codebox
//!
//! An embeddable, secure code-execution runtime that lets a host program
//! expose a catalog of named tools to untrusted guest scripts. Guest code
//! runs inside a QuickJS sandbox with no filesystem, network, clock or
//! loader access; its only window to the outside world is the
//! `tool(name, args)` bridge backed by host-async handlers.
//!
//! # Core Modules
//!
//! - [`sandbox`]: the long-lived [`Sandbox`] facade and its `execute` tool
//! - [`registry`]: ordered tool catalog with the four built-in tools
//! - [`events`]: before/success/error interception callbacks
//! - [`blobs`]: lifting of binary payloads out of tool results
//! - [`types`]: tools, execution results, configuration
//!
//! # Example
//!
//! ```ignore
//! use codebox::{create_sandbox, SandboxOptions, Tool};
//! use serde_json::json;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let add = Tool::new(
//!     "add",
//!     json!({ "type": "object", "properties": { "a": {}, "b": {} } }),
//!     |args| async move {
//!         Ok(json!(args["a"].as_i64().unwrap_or(0) + args["b"].as_i64().unwrap_or(0)))
//!     },
//! );
//!
//! let sandbox = create_sandbox(SandboxOptions::new().with_tool(add))?;
//! let result = sandbox.execute("return await tool('add', { a: 2, b: 3 });").await;
//! assert_eq!(result.result, Some(json!(5)));
//! # Ok(())
//! # }
//! ```

pub mod blobs;
pub mod events;
pub mod registry;
pub mod sandbox;
pub mod types;

mod bridge;
mod engine;
mod marshal;
mod store;

pub use blobs::{extract_blobs, BlobTable};
pub use events::{BeforeToolCall, EventCallbacks, ToolCallError, ToolCallSuccess};
pub use registry::{ToolRegistry, RESERVED_TOOL_NAMES};
pub use sandbox::{create_sandbox, Sandbox, SandboxOptions};
pub use store::PREV_KEY;
pub use types::{Blob, ExecuteResult, SandboxConfig, Tool, ToolHandler};

//! # Core Data Model
//!
//! Host-side records exchanged with the sandbox: tool definitions, execution
//! results, lifted binary payloads, and the engine configuration.
//!
//! Everything that crosses the host↔guest boundary is JSON-shaped
//! (`serde_json::Value`); richer values (functions, cyclic graphs, host
//! handles) are out of contract.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Host-async tool handler: JSON-shaped input to JSON-shaped output.
///
/// A rejection's message string is exactly what the guest will observe.
pub type ToolHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// A named host function callable from guest code via the bridge.
///
/// Tools live as long as the [`Sandbox`](crate::sandbox::Sandbox) that owns
/// them. `input_schema` must be an object-typed JSON schema.
#[derive(Clone)]
pub struct Tool {
    pub name: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub input_schema: Value,
    pub output_schema: Option<Value>,
    pub handler: ToolHandler,
}

impl Tool {
    /// Create a tool from a name, an object-typed input schema, and an async
    /// handler closure.
    pub fn new<F, Fut>(name: impl Into<String>, input_schema: Value, handler: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            title: None,
            description: None,
            input_schema,
            output_schema: None,
            handler: Arc::new(move |args| Box::pin(handler(args))),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_output_schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self
    }
}

impl fmt::Debug for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("title", &self.title)
            .field("description", &self.description)
            .field("input_schema", &self.input_schema)
            .field("output_schema", &self.output_schema)
            .finish_non_exhaustive()
    }
}

/// A binary payload lifted out of a tool result into the per-execution
/// blob table. `data` is opaque base64 text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Blob {
    pub id: String,
    pub data: String,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
}

/// Record of one execution.
///
/// On oversize results the record is still successful but carries an `error`
/// string announcing truncation; `result` is preserved in full. Callers must
/// treat `success == true` with a non-empty `error` as a warning, not a
/// failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Blobs lifted during this execution. Always present, possibly empty.
    pub blobs: Vec<Blob>,
}

impl ExecuteResult {
    pub(crate) fn failure(error: impl Into<String>, blobs: Vec<Blob>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.into()),
            blobs,
        }
    }
}

// =============================================================================
// SandboxConfig
// =============================================================================

/// Default cap on the serialised result size, in characters.
pub const DEFAULT_MAX_RESULT_CHARS: usize = 40_000;

/// Default number of polling-loop iterations before an execution times out.
pub const DEFAULT_MAX_POLL_ITERATIONS: usize = 500;

/// How long one polling-loop iteration waits for tool-resolution progress.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// Configuration for the execution engine.
///
/// Total guest wall-clock is bounded by roughly
/// `max_poll_iterations × poll_interval_ms`. The optional limits are enforced
/// by the embedded engine itself: `instruction_budget` counts interrupt-hook
/// callbacks and stops never-yielding guest loops that the cooperative
/// polling loop cannot reach.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    pub max_result_chars: usize,
    pub max_poll_iterations: usize,
    pub poll_interval_ms: u64,
    pub memory_limit_bytes: Option<usize>,
    pub max_stack_bytes: Option<usize>,
    pub instruction_budget: Option<u64>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            max_result_chars: DEFAULT_MAX_RESULT_CHARS,
            max_poll_iterations: DEFAULT_MAX_POLL_ITERATIONS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            memory_limit_bytes: None,
            max_stack_bytes: None,
            instruction_budget: None,
        }
    }
}

impl SandboxConfig {
    pub fn with_max_result_chars(mut self, chars: usize) -> Self {
        self.max_result_chars = chars;
        self
    }

    pub fn with_max_poll_iterations(mut self, iterations: usize) -> Self {
        self.max_poll_iterations = iterations;
        self
    }

    pub fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn with_memory_limit_bytes(mut self, bytes: usize) -> Self {
        self.memory_limit_bytes = Some(bytes);
        self
    }

    pub fn with_max_stack_bytes(mut self, bytes: usize) -> Self {
        self.max_stack_bytes = Some(bytes);
        self
    }

    pub fn with_instruction_budget(mut self, budget: u64) -> Self {
        self.instruction_budget = Some(budget);
        self
    }
}

//! Codebox MCP Adapter
//!
//! Converts remote tool catalogs, reached over stdio JSON-RPC, into
//! [`codebox::Tool`]s ready for a sandbox. Each catalog is keyed by a
//! prefix:
//!
//! - ordinary tools become `<prefix>__<name>`
//! - prompt endpoints become `<prefix>__prompt__<name>`
//! - resource and resource-template endpoints become
//!   `<prefix>__resource__<name>`
//!
//! Resource templates turn their `{param}` placeholders into a required
//! string input schema; argument values are percent-encoded into the URI.
//! Remote results are unwrapped preferring structured content, then the
//! first text content parsed as JSON, then plain text. Binary resource
//! contents keep the `{blob, mimeType}` shape, which the sandbox's blob
//! extractor lifts into its per-execution blob table.
//!
//! # Example
//!
//! ```ignore
//! use codebox::{create_sandbox, SandboxOptions};
//! use codebox_mcp::{tools_from_catalog, CatalogClient};
//!
//! # fn demo() -> anyhow::Result<()> {
//! let client = CatalogClient::spawn("notes", "notes-server", &[])?;
//! let tools = tools_from_catalog("notes", client);
//! let sandbox = create_sandbox(SandboxOptions::new().with_tools(tools))?;
//! # Ok(())
//! # }
//! ```

mod adapter;
mod client;
pub mod protocol;

pub use adapter::{tools_from_catalog, tools_from_catalogs};
pub use client::CatalogClient;

//! Catalog → sandbox tool conversion.
//!
//! Each remote catalog is keyed by a prefix. Ordinary tools become
//! `<prefix>__<name>`, prompt endpoints `<prefix>__prompt__<name>`, and
//! resource / resource-template endpoints `<prefix>__resource__<name>`.
//! Resource templates parse `{param}` placeholders out of their URI template
//! and synthesise an input schema requiring each placeholder as a string;
//! values are percent-encoded before substitution.
//!
//! Every catalog fetch is independent: a client that does not support an
//! endpoint simply contributes nothing for it.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::{bail, Result};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};

use codebox::Tool;

use crate::client::CatalogClient;
use crate::protocol::{
    ReadResourceResult, RemotePromptArgument, RemoteResourceTemplate, ToolCallResult,
};

type SharedClient = Arc<Mutex<CatalogClient>>;

/// Boxed future shape shared by every adapter handler.
type CallFuture = Pin<Box<dyn Future<Output = Result<Value>> + Send>>;

/// Convert several prefix-keyed catalogs into sandbox tools.
pub fn tools_from_catalogs(
    catalogs: impl IntoIterator<Item = (String, CatalogClient)>,
) -> Vec<Tool> {
    catalogs
        .into_iter()
        .flat_map(|(prefix, client)| tools_from_catalog(&prefix, client))
        .collect()
}

/// Convert one catalog into sandbox tools under the given prefix.
pub fn tools_from_catalog(prefix: &str, client: CatalogClient) -> Vec<Tool> {
    let client: SharedClient = Arc::new(Mutex::new(client));
    let mut tools = Vec::new();

    match client.lock().list_tools() {
        Ok(infos) => {
            for info in infos {
                let mut tool = Tool::new(
                    format!("{prefix}__{}", info.name),
                    object_schema(info.input_schema),
                    call_handler(client.clone(), info.name.clone()),
                );
                if let Some(description) = info.description {
                    tool = tool.with_description(description);
                }
                if let Some(schema) = info.output_schema {
                    tool = tool.with_output_schema(schema);
                }
                tools.push(tool);
            }
        }
        Err(err) => tracing::debug!(prefix, "catalog has no tools endpoint: {err}"),
    }

    match client.lock().list_prompts() {
        Ok(infos) => {
            for info in infos {
                let mut tool = Tool::new(
                    format!("{prefix}__prompt__{}", info.name),
                    prompt_input_schema(&info.arguments),
                    prompt_handler(client.clone(), info.name.clone()),
                );
                if let Some(description) = info.description {
                    tool = tool.with_description(description);
                }
                tools.push(tool);
            }
        }
        Err(err) => tracing::debug!(prefix, "catalog has no prompts endpoint: {err}"),
    }

    match client.lock().list_resources() {
        Ok(infos) => {
            for info in infos {
                let mut tool = Tool::new(
                    format!("{prefix}__resource__{}", info.name),
                    json!({ "type": "object", "properties": {} }),
                    resource_handler(client.clone(), info.uri.clone()),
                );
                if let Some(description) = info.description {
                    tool = tool.with_description(description);
                }
                tools.push(tool);
            }
        }
        Err(err) => tracing::debug!(prefix, "catalog has no resources endpoint: {err}"),
    }

    match client.lock().list_resource_templates() {
        Ok(infos) => {
            for info in infos {
                tools.push(template_tool(prefix, client.clone(), info));
            }
        }
        Err(err) => tracing::debug!(prefix, "catalog has no resource templates endpoint: {err}"),
    }

    tools
}

fn call_handler(
    client: SharedClient,
    remote_name: String,
) -> impl Fn(Value) -> CallFuture + Send + Sync {
    move |args| {
        let client = client.clone();
        let remote_name = remote_name.clone();
        Box::pin(async move {
            let result = tokio::task::spawn_blocking(move || {
                client.lock().call_tool(&remote_name, args)
            })
            .await??;
            unwrap_tool_result(result)
        })
    }
}

fn prompt_handler(
    client: SharedClient,
    remote_name: String,
) -> impl Fn(Value) -> CallFuture + Send + Sync {
    move |args| {
        let client = client.clone();
        let remote_name = remote_name.clone();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || client.lock().get_prompt(&remote_name, args))
                .await?
        })
    }
}

fn resource_handler(
    client: SharedClient,
    uri: String,
) -> impl Fn(Value) -> CallFuture + Send + Sync {
    move |_args| {
        let client = client.clone();
        let uri = uri.clone();
        Box::pin(async move {
            let result =
                tokio::task::spawn_blocking(move || client.lock().read_resource(&uri)).await??;
            unwrap_resource(result)
        })
    }
}

fn template_tool(prefix: &str, client: SharedClient, info: RemoteResourceTemplate) -> Tool {
    let params = template_params(&info.uri_template);
    let template = info.uri_template.clone();

    let mut tool = Tool::new(
        format!("{prefix}__resource__{}", info.name),
        template_input_schema(&params),
        move |args| {
            let client = client.clone();
            let uri = expand_template(&template, &args);
            Box::pin(async move {
                let result =
                    tokio::task::spawn_blocking(move || client.lock().read_resource(&uri))
                        .await??;
                unwrap_resource(result)
            })
        },
    );
    if let Some(description) = info.description {
        tool = tool.with_description(description);
    }
    tool
}

/// Coerce a remote input schema into the object-typed shape the registry
/// requires.
fn object_schema(schema: Option<Value>) -> Value {
    match schema {
        Some(schema) if schema.get("type").and_then(Value::as_str) == Some("object") => schema,
        _ => json!({ "type": "object", "properties": {} }),
    }
}

fn prompt_input_schema(arguments: &[RemotePromptArgument]) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();
    for argument in arguments {
        let mut property = Map::new();
        property.insert("type".to_string(), json!("string"));
        if let Some(description) = &argument.description {
            property.insert("description".to_string(), json!(description));
        }
        properties.insert(argument.name.clone(), Value::Object(property));
        if argument.required {
            required.push(json!(argument.name));
        }
    }
    json!({ "type": "object", "properties": properties, "required": required })
}

fn template_input_schema(params: &[String]) -> Value {
    let mut properties = Map::new();
    for param in params {
        properties.insert(param.clone(), json!({ "type": "string" }));
    }
    json!({ "type": "object", "properties": properties, "required": params })
}

/// Parse `{param}` placeholders out of a URI template, in order, deduplicated.
pub(crate) fn template_params(template: &str) -> Vec<String> {
    let mut params: Vec<String> = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        let Some(len) = rest[start + 1..].find('}') else {
            break;
        };
        let name = &rest[start + 1..start + 1 + len];
        if !name.is_empty() && !params.iter().any(|p| p == name) {
            params.push(name.to_string());
        }
        rest = &rest[start + 1 + len + 1..];
    }
    params
}

/// Substitute percent-encoded argument values into a URI template.
pub(crate) fn expand_template(template: &str, args: &Value) -> String {
    let mut uri = template.to_string();
    for param in template_params(template) {
        let value = match args.get(&param) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        };
        uri = uri.replace(
            &format!("{{{param}}}"),
            urlencoding::encode(&value).as_ref(),
        );
    }
    uri
}

/// Unwrap a remote tool result: prefer structured content, fall back to the
/// first text content interpreted as JSON then as plain text. Media content
/// surfaces in the payload shape the sandbox's blob extractor lifts.
fn unwrap_tool_result(result: ToolCallResult) -> Result<Value> {
    if result.is_error {
        let message: Vec<&str> = result
            .content
            .iter()
            .filter_map(|item| item.text.as_deref())
            .collect();
        bail!("{}", message.join("\n"));
    }
    if let Some(structured) = result.structured_content {
        return Ok(structured);
    }
    for item in &result.content {
        if let Some(text) = &item.text {
            return Ok(serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.clone())));
        }
        if let (Some(kind), Some(data), Some(mime_type)) =
            (item.kind.as_deref(), &item.data, &item.mime_type)
        {
            if kind == "image" || kind == "audio" {
                return Ok(json!({ "type": kind, "data": data, "mimeType": mime_type }));
            }
        }
    }
    Ok(Value::Null)
}

/// Unwrap a resource read. Binary contents surface as `{blob, mimeType}` so
/// the sandbox lifts them into its blob table.
fn unwrap_resource(result: ReadResourceResult) -> Result<Value> {
    let Some(contents) = result.contents.into_iter().next() else {
        return Ok(Value::Null);
    };
    if let Some(blob) = contents.blob {
        let mime_type = contents
            .mime_type
            .unwrap_or_else(|| "application/octet-stream".to_string());
        return Ok(json!({ "blob": blob, "mimeType": mime_type }));
    }
    if let Some(text) = contents.text {
        return Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)));
    }
    Ok(Value::Null)
}

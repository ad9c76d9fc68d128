//! Adapter tests against a mock catalog server.
//!
//! The mock is a small Python script speaking line-delimited JSON-RPC over
//! stdio; tests are skipped when python3 is unavailable.

use codebox::{create_sandbox, SandboxOptions};
use codebox_mcp::{tools_from_catalog, CatalogClient};
use serde_json::json;

/// Mock server: one tool, one prompt, one resource, one resource template.
const MOCK_SERVER: &str = r#"
import sys, json

def reply(req_id, result):
    print(json.dumps({"jsonrpc": "2.0", "id": req_id, "result": result}), flush=True)

for line in sys.stdin:
    line = line.strip()
    if not line:
        continue
    try:
        req = json.loads(line)
    except Exception:
        continue
    method = req.get("method", "")
    req_id = req.get("id")

    if method == "initialize":
        reply(req_id, {"protocolVersion": "2024-11-05", "capabilities": {}})
    elif method == "notifications/initialized":
        pass
    elif method == "tools/list":
        reply(req_id, {"tools": [
            {"name": "double", "description": "Double a number",
             "inputSchema": {"type": "object", "properties": {"n": {"type": "number"}}, "required": ["n"]}}
        ]})
    elif method == "tools/call":
        params = req.get("params", {})
        if params.get("name") == "double":
            n = params.get("arguments", {}).get("n", 0)
            reply(req_id, {"content": [{"type": "text", "text": json.dumps({"doubled": n * 2})}], "isError": False})
        else:
            reply(req_id, {"content": [{"type": "text", "text": "unknown tool"}], "isError": True})
    elif method == "prompts/list":
        reply(req_id, {"prompts": [
            {"name": "summarize", "description": "Summarize a topic",
             "arguments": [{"name": "topic", "required": True}]}
        ]})
    elif method == "prompts/get":
        topic = req.get("params", {}).get("arguments", {}).get("topic", "")
        reply(req_id, {"messages": [{"role": "user", "content": {"type": "text", "text": "Summarize " + topic}}]})
    elif method == "resources/list":
        reply(req_id, {"resources": [
            {"uri": "mock://readme", "name": "readme", "mimeType": "text/plain"}
        ]})
    elif method == "resources/templates/list":
        reply(req_id, {"resourceTemplates": [
            {"uriTemplate": "mock://notes/{user}/{topic}", "name": "note"}
        ]})
    elif method == "resources/read":
        uri = req.get("params", {}).get("uri", "")
        if uri == "mock://readme":
            reply(req_id, {"contents": [{"uri": uri, "mimeType": "text/plain", "text": "hello from readme"}]})
        else:
            reply(req_id, {"contents": [{"uri": uri, "text": json.dumps({"read": uri})}]})
    else:
        print(json.dumps({"jsonrpc": "2.0", "id": req_id,
                          "error": {"code": -32601, "message": "Method not found"}}), flush=True)
"#;

fn spawn_mock(name: &str) -> Option<CatalogClient> {
    let script_path = std::env::temp_dir().join(format!("codebox_mock_catalog_{name}.py"));
    std::fs::write(&script_path, MOCK_SERVER).ok()?;
    match CatalogClient::spawn(
        name,
        "python3",
        &[script_path.to_string_lossy().into_owned()],
    ) {
        Ok(client) => Some(client),
        Err(err) => {
            eprintln!("skipping: mock catalog unavailable ({err})");
            None
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_catalog_converts_to_prefixed_tools() {
    let Some(client) = spawn_mock("naming") else {
        return;
    };
    let tools = tools_from_catalog("mock", client);
    let names: Vec<&str> = tools.iter().map(|tool| tool.name.as_str()).collect();

    assert!(names.contains(&"mock__double"));
    assert!(names.contains(&"mock__prompt__summarize"));
    assert!(names.contains(&"mock__resource__readme"));
    assert!(names.contains(&"mock__resource__note"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_remote_tool_round_trip_through_sandbox() {
    let Some(client) = spawn_mock("tool") else {
        return;
    };
    let tools = tools_from_catalog("mock", client);
    let sandbox = create_sandbox(SandboxOptions::new().with_tools(tools)).unwrap();

    let result = sandbox
        .execute("return await tool('mock__double', { n: 21 });")
        .await;

    assert!(result.success, "error: {:?}", result.error);
    assert_eq!(result.result, Some(json!({ "doubled": 42 })));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_prompt_endpoint_returns_messages() {
    let Some(client) = spawn_mock("prompt") else {
        return;
    };
    let tools = tools_from_catalog("mock", client);
    let prompt = tools
        .into_iter()
        .find(|tool| tool.name == "mock__prompt__summarize")
        .unwrap();
    assert_eq!(prompt.input_schema["required"], json!(["topic"]));

    let value = (prompt.handler)(json!({ "topic": "rust" })).await.unwrap();
    assert_eq!(
        value["messages"][0]["content"]["text"],
        json!("Summarize rust")
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_fixed_resource_reads_text() {
    let Some(client) = spawn_mock("resource") else {
        return;
    };
    let tools = tools_from_catalog("mock", client);
    let readme = tools
        .into_iter()
        .find(|tool| tool.name == "mock__resource__readme")
        .unwrap();

    let value = (readme.handler)(json!({})).await.unwrap();
    assert_eq!(value, json!("hello from readme"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_resource_template_substitutes_encoded_params() {
    let Some(client) = spawn_mock("template") else {
        return;
    };
    let tools = tools_from_catalog("mock", client);
    let note = tools
        .into_iter()
        .find(|tool| tool.name == "mock__resource__note")
        .unwrap();
    assert_eq!(note.input_schema["required"], json!(["user", "topic"]));

    let value = (note.handler)(json!({ "user": "ada", "topic": "a b" }))
        .await
        .unwrap();
    assert_eq!(value, json!({ "read": "mock://notes/ada/a%20b" }));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_remote_error_rejects_through_sandbox() {
    let Some(client) = spawn_mock("error") else {
        return;
    };
    // Adapter names are registry names: a remote name the catalog never
    // listed is simply not a tool.
    let tools = tools_from_catalog("mock", client);
    let sandbox = create_sandbox(SandboxOptions::new().with_tools(tools)).unwrap();

    let result = sandbox
        .execute("return await tool('mock__missing', {});")
        .await;
    assert!(!result.success);
    assert_eq!(
        result.error.as_deref(),
        Some("Tool not found: mock__missing")
    );
}

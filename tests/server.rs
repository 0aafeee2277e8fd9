//! HTTP tool surface: the router served on a real socket, driven with
//! `reqwest`, including a custom tool registered next to the built-ins.

use async_trait::async_trait;
use docs_harness::config::Config;
use docs_harness::engine::Engine;
use docs_harness::error::Result;
use docs_harness::server::build_router;
use docs_harness::traits::{Tool, ToolContext, ToolRegistry};
use serde_json::{json, Value};
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

// ─── Test Tool ──────────────────────────────────────────────────────

struct ItemCountTool;

#[async_trait]
impl Tool for ItemCountTool {
    fn name(&self) -> &str {
        "item_count"
    }

    fn description(&self) -> &str {
        "Number of indexed items"
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _params: Value, ctx: &ToolContext) -> Result<Value> {
        Ok(json!({ "items": ctx.engine.snapshot().len() }))
    }
}

// ─── Harness ────────────────────────────────────────────────────────

struct TestServer {
    _tmp: TempDir,
    base: String,
    client: reqwest::Client,
}

impl TestServer {
    async fn start() -> Self {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("docs")).unwrap();
        fs::write(
            root.join("docs/guide.md"),
            "# Guide\n\n## Retry Policy\n\nRetry failed calls with backoff.\n",
        )
        .unwrap();

        let engine = Arc::new(Engine::open(Config::for_project(root)).await.unwrap());
        let mut tools = ToolRegistry::with_builtins();
        tools.register(Box::new(ItemCountTool));
        let app = build_router(engine, tools);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            _tmp: tmp,
            base: format!("http://{}", addr),
            client: reqwest::Client::new(),
        }
    }

    async fn call(&self, tool: &str, params: Value) -> (u16, Value) {
        let resp = self
            .client
            .post(format!("{}/tools/{}", self.base, tool))
            .json(&params)
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn health_reports_ok() {
    let server = TestServer::start().await;
    let body: Value = server
        .client
        .get(format!("{}/health", server.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["items"], 0);
    assert_eq!(body["reindexing"], false);
}

#[tokio::test]
async fn tool_list_includes_builtins_and_custom() {
    let server = TestServer::start().await;
    let body: Value = server
        .client
        .get(format!("{}/tools/list", server.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let tools = body["tools"].as_array().unwrap();
    let search = tools.iter().find(|t| t["name"] == "search_docs").unwrap();
    assert_eq!(search["builtin"], true);
    assert_eq!(search["parameters"]["required"][0], "query");

    let custom = tools.iter().find(|t| t["name"] == "item_count").unwrap();
    assert_eq!(custom["builtin"], false);
}

#[tokio::test]
async fn index_then_search() {
    let server = TestServer::start().await;

    let (status, body) = server.call("index_documentation", json!({})).await;
    assert_eq!(status, 200, "{}", body);
    assert_eq!(body["result"]["added"], 1);

    let (status, body) = server.call("search_docs", json!({ "query": "retry" })).await;
    assert_eq!(status, 200);
    let results = body["result"]["results"].as_array().unwrap();
    assert_eq!(results[0]["path"], "docs/guide.md");
    assert_eq!(results[0]["section"], "Retry Policy");

    let (_, body) = server.call("item_count", json!({})).await;
    assert_eq!(body["result"]["items"], 1);
}

#[tokio::test]
async fn validation_errors_are_400() {
    let server = TestServer::start().await;

    let (status, body) = server.call("search_docs", json!({})).await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "validation_error");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("missing required parameter: query"));

    let (status, _) = server
        .call("search_docs", json!({ "query": "retry", "limit": 0 }))
        .await;
    assert_eq!(status, 400);

    let (status, body) = server
        .call("get_prompt", json!({ "id": "  " }))
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "validation_error");
}

#[tokio::test]
async fn missing_records_are_404() {
    let server = TestServer::start().await;

    let (status, body) = server.call("get_prompt", json!({ "id": "nope" })).await;
    assert_eq!(status, 404);
    assert_eq!(body["error"]["code"], "not_found");

    let (status, _) = server.call("get_item", json!({ "id": "doc:nope.md" })).await;
    assert_eq!(status, 404);

    let (status, body) = server.call("no_such_tool", json!({})).await;
    assert_eq!(status, 404);
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("no_such_tool"));
}

#[tokio::test]
async fn prompt_lifecycle_over_http() {
    let server = TestServer::start().await;

    let (status, body) = server
        .call(
            "create_prompt",
            json!({ "id": "greet", "name": "Greeting", "template_text": "Hello {who}" }),
        )
        .await;
    assert_eq!(status, 200, "{}", body);
    assert_eq!(body["result"]["version"], 1);

    let (status, body) = server
        .call(
            "edit_prompt",
            json!({ "id": "greet", "changes": { "name": "Hi" }, "expected_version": 1 }),
        )
        .await;
    assert_eq!(status, 200, "{}", body);
    assert_eq!(body["result"]["version"], 2);

    let (status, _) = server
        .call(
            "edit_prompt",
            json!({ "id": "greet", "changes": { "name": "Again" }, "expected_version": 1 }),
        )
        .await;
    assert_eq!(status, 400);

    let (status, body) = server
        .call(
            "resolve_prompt",
            json!({ "id": "greet", "values": { "who": "world" }, "auto_fill": false }),
        )
        .await;
    assert_eq!(status, 200, "{}", body);
    assert_eq!(body["result"]["text"], "Hello world");
    assert_eq!(body["result"]["sources"]["who"]["source"], "explicit");

    let (status, body) = server
        .call(
            "resolve_prompt",
            json!({ "id": "greet", "auto_fill": false }),
        )
        .await;
    assert_eq!(status, 400);
    assert!(body["error"]["message"].as_str().unwrap().contains("who"));
}

#[tokio::test]
async fn record_usage_updates_aggregate() {
    let server = TestServer::start().await;

    let (status, body) = server
        .call(
            "record_usage",
            json!({ "subject_id": "code_review", "outcome_score": 0.5 }),
        )
        .await;
    assert_eq!(status, 200, "{}", body);
    assert_eq!(body["result"]["usage"]["count"], 1);

    let (_, body) = server.call("stats", json!({})).await;
    assert_eq!(body["result"]["usage_events"], 1);
    assert_eq!(body["result"]["prompts"], 6);
}

#[tokio::test]
async fn suggest_and_generate() {
    let server = TestServer::start().await;
    server.call("index_documentation", json!({ "force": true })).await;

    let (status, body) = server
        .call("suggest_prompts", json!({ "task_context": "security review" }))
        .await;
    assert_eq!(status, 200);
    assert!(!body["result"]["suggestions"].as_array().unwrap().is_empty());

    let (status, body) = server
        .call(
            "generate_contextual_prompt",
            json!({ "task": "review", "docs_query": "retry" }),
        )
        .await;
    assert_eq!(status, 200, "{}", body);
    assert_eq!(body["result"]["variables"][0], "content");
    assert_eq!(body["result"]["sources"][0]["path"], "docs/guide.md");
}

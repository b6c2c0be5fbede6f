//! Integration tests for the HTTP shell, served on an ephemeral port and
//! exercised with `reqwest`.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use mcp_stdio_bridge::config::ExecConfig;
use mcp_stdio_bridge::http::{serve_listener, AppState};
use mcp_stdio_bridge::service::McpService;

use super::test_helpers::{fast_options, service_settings, test_service};

struct TestServer {
    base_url: String,
    ct: CancellationToken,
    service: Arc<McpService>,
}

impl TestServer {
    async fn shutdown(self) {
        self.ct.cancel();
        self.service.shutdown().await;
    }
}

async fn spawn_http(service: McpService, exec: ExecConfig) -> TestServer {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral");
    let addr = listener.local_addr().expect("local addr");
    let service = Arc::new(service);
    let state = Arc::new(AppState {
        service: Arc::clone(&service),
        exec,
    });

    let ct = CancellationToken::new();
    let server_ct = ct.clone();
    tokio::spawn(async move {
        let _ = serve_listener(listener, state, server_ct).await;
    });

    TestServer {
        base_url: format!("http://{addr}"),
        ct,
        service,
    }
}

async fn get_json(url: &str) -> (u16, Value) {
    let resp = reqwest::get(url).await.expect("GET");
    let status = resp.status().as_u16();
    (status, resp.json().await.expect("json body"))
}

async fn post_json(url: &str, body: &Value) -> (u16, Value) {
    let resp = reqwest::Client::new()
        .post(url)
        .json(body)
        .send()
        .await
        .expect("POST");
    let status = resp.status().as_u16();
    (status, resp.json().await.expect("json body"))
}

// ── MCP routes ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn healthz_is_ok() {
    let server = spawn_http(test_service(&[]), ExecConfig::default()).await;
    let (status, body) = get_json(&format!("{}/healthz", server.base_url)).await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");
    server.shutdown().await;
}

#[tokio::test]
async fn status_reports_connection() {
    let server = spawn_http(test_service(&[]), ExecConfig::default()).await;

    let (_, before) = get_json(&format!("{}/api/mcp/status", server.base_url)).await;
    assert_eq!(before["connected"], false);
    assert!(before["timestamp"].as_i64().unwrap_or(0) > 0);

    server.service.start().await.expect("start");
    let (status, after) = get_json(&format!("{}/api/mcp/status", server.base_url)).await;
    assert_eq!(status, 200);
    assert_eq!(after["connected"], true);
    server.shutdown().await;
}

#[tokio::test]
async fn tools_are_wrapped_in_object() {
    let server = spawn_http(test_service(&[]), ExecConfig::default()).await;
    let (status, body) = get_json(&format!("{}/api/mcp/tools", server.base_url)).await;

    assert_eq!(status, 200);
    let tools = body["tools"].as_array().expect("tools array");
    assert_eq!(tools[0]["name"], "echo");
    assert_eq!(tools[0]["inputSchema"], Value::Null);
    server.shutdown().await;
}

#[tokio::test]
async fn execute_tool_maps_success_and_failure() {
    let server = spawn_http(test_service(&[]), ExecConfig::default()).await;

    let (ok_status, ok) = post_json(
        &format!("{}/api/mcp/tools/echo/execute", server.base_url),
        &json!({"text": "over http"}),
    )
    .await;
    assert_eq!(ok_status, 200);
    assert_eq!(ok["success"], true);
    assert_eq!(ok["textContent"], "over http");

    let (fail_status, fail) = post_json(
        &format!("{}/api/mcp/tools/fail/execute", server.base_url),
        &json!({}),
    )
    .await;
    assert_eq!(fail_status, 400);
    assert_eq!(fail["success"], false);
    server.shutdown().await;
}

#[tokio::test]
async fn execute_tool_without_server_is_unavailable() {
    let settings = mcp_stdio_bridge::service::ServiceSettings {
        program: "/definitely/not/a/real/binary".into(),
        ..service_settings(&[], fast_options())
    };
    let server = spawn_http(McpService::new(settings), ExecConfig::default()).await;

    let (status, body) = post_json(
        &format!("{}/api/mcp/tools/echo/execute", server.base_url),
        &json!({}),
    )
    .await;
    assert_eq!(status, 503);
    assert_eq!(body["success"], false);

    let (list_status, tools) = get_json(&format!("{}/api/mcp/tools", server.base_url)).await;
    assert_eq!(list_status, 200);
    assert_eq!(tools, json!({"tools": []}));
    server.shutdown().await;
}

#[tokio::test]
async fn resource_routes() {
    let server = spawn_http(test_service(&[]), ExecConfig::default()).await;

    let (_, list) = get_json(&format!("{}/api/mcp/resources", server.base_url)).await;
    assert_eq!(list[0]["uri"], "memo://readme");
    assert_eq!(list[0]["mimeType"], "text/plain");

    let (status, content) = get_json(&format!(
        "{}/api/mcp/resources/read?uri=memo://readme",
        server.base_url
    ))
    .await;
    assert_eq!(status, 200);
    assert_eq!(content["textContent"], "hello from the test server");

    let (missing_status, _) =
        get_json(&format!("{}/api/mcp/resources/read", server.base_url)).await;
    assert_eq!(missing_status, 400);

    let (unknown_status, unknown) = get_json(&format!(
        "{}/api/mcp/resources/read?uri=memo://nope",
        server.base_url
    ))
    .await;
    assert_eq!(unknown_status, 400);
    assert_eq!(unknown["success"], false);
    server.shutdown().await;
}

#[tokio::test]
async fn prompt_route() {
    let server = spawn_http(test_service(&[]), ExecConfig::default()).await;
    let (status, prompts) = get_json(&format!("{}/api/mcp/prompts", server.base_url)).await;
    assert_eq!(status, 200);
    assert_eq!(prompts[0]["name"], "summarize");
    assert_eq!(prompts[0]["arguments"], json!(["text", "style"]));
    server.shutdown().await;
}

// ── Code execution route ────────────────────────────────────────────────────

#[tokio::test]
async fn execute_python_requires_code() {
    let server = spawn_http(test_service(&[]), ExecConfig::default()).await;
    let (status, body) = post_json(&format!("{}/execute-python", server.base_url), &json!({})).await;
    assert_eq!(status, 400);
    assert!(body["error"].is_string());
    server.shutdown().await;
}

#[cfg(unix)]
#[tokio::test]
async fn execute_python_runs_code_with_interpreter() {
    let exec = ExecConfig {
        interpreter: "sh".into(),
        timeout_seconds: 5,
    };
    let server = spawn_http(test_service(&[]), exec).await;

    let (status, body) = post_json(
        &format!("{}/execute-python", server.base_url),
        &json!({"code": "echo out; echo err >&2; exit 2"}),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["stdout"], "out\n");
    assert_eq!(body["stderr"], "err\n");
    assert_eq!(body["exit_code"], 2);
    server.shutdown().await;
}

#[cfg(unix)]
#[tokio::test]
async fn execute_python_timeout_is_408() {
    let exec = ExecConfig {
        interpreter: "sh".into(),
        timeout_seconds: 1,
    };
    let server = spawn_http(test_service(&[]), exec).await;

    let started = std::time::Instant::now();
    let (status, _) = post_json(
        &format!("{}/execute-python", server.base_url),
        &json!({"code": "sleep 30"}),
    )
    .await;
    assert_eq!(status, 408);
    assert!(started.elapsed() < Duration::from_secs(10));
    server.shutdown().await;
}

//! Integration tests for the service facade: single-flight initialization,
//! failure propagation and retry, reconnection, and graceful degradation.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use mcp_stdio_bridge::config::GlobalConfig;
use mcp_stdio_bridge::service::{McpService, ServiceSettings};
use mcp_stdio_bridge::stdio::ConnectionOptions;
use mcp_stdio_bridge::AppError;

use super::test_helpers::{fast_options, service_settings, test_service, TEST_SERVER};

// ── Initialization ──────────────────────────────────────────────────────────

#[tokio::test]
async fn service_is_lazy() {
    let service = test_service(&[]);
    assert!(!service.is_connected());
    assert_eq!(service.build_attempts(), 0);
    assert!(!service.status().connected);
}

#[tokio::test]
async fn concurrent_first_callers_share_one_build() {
    let service = Arc::new(test_service(&[]));

    let mut handles = Vec::new();
    for _ in 0..10 {
        let service = Arc::clone(&service);
        handles.push(tokio::spawn(async move { service.ensure_ready().await }));
    }
    let mut connections = Vec::new();
    for handle in handles {
        connections.push(handle.await.expect("task").expect("ready"));
    }

    assert_eq!(service.build_attempts(), 1, "exactly one child is spawned");
    assert!(connections.iter().all(|c| Arc::ptr_eq(c, &connections[0])));
    assert!(service.is_connected());
    service.shutdown().await;
}

#[tokio::test]
async fn waiters_share_the_failure_and_next_call_retries() {
    let service = Arc::new(test_service(&["--fail-init"]));

    let mut handles = Vec::new();
    for _ in 0..5 {
        let service = Arc::clone(&service);
        handles.push(tokio::spawn(async move { service.ensure_ready().await }));
    }
    for handle in handles {
        let err = handle.await.expect("task").expect_err("init must fail");
        assert!(matches!(err, AppError::Initialization(_)), "unexpected error: {err}");
    }
    assert_eq!(service.build_attempts(), 1);
    assert!(!service.is_connected());

    let retry = service.ensure_ready().await.expect_err("still failing");
    assert!(matches!(retry, AppError::Initialization(_)));
    assert_eq!(service.build_attempts(), 2, "failures are not cached");
}

#[tokio::test]
async fn start_builds_eagerly() {
    let service = test_service(&[]);
    service.start().await.expect("start");
    assert!(service.is_connected());
    assert_eq!(service.build_attempts(), 1);

    service.list_tools().await;
    assert_eq!(service.build_attempts(), 1, "ready connection is reused");
    service.shutdown().await;
    assert!(!service.is_connected());
}

#[tokio::test]
async fn missing_script_is_reported() {
    let settings = ServiceSettings {
        script: Some(format!("missing_{}.py", uuid::Uuid::new_v4().simple())),
        ..service_settings(&[], fast_options())
    };
    let service = McpService::new(settings);

    let err = service.ensure_ready().await.expect_err("must fail");
    assert!(matches!(err, AppError::ScriptNotFound { .. }), "unexpected error: {err}");
    assert!(service.list_tools().await.is_empty());
}

#[tokio::test]
async fn settings_follow_config() {
    let mut config = GlobalConfig::default();
    config.server.command = TEST_SERVER.to_owned();
    config.server.script = String::new();
    config.timeouts.call_seconds = 7;

    let service = McpService::from_config(&config);
    assert_eq!(service.settings().program, TEST_SERVER);
    assert!(service.settings().script.is_none());
    assert_eq!(service.settings().options.call_timeout, Duration::from_secs(7));

    assert_eq!(service.list_tools().await.len(), 6);
    service.shutdown().await;
}

// ── Domain operations ───────────────────────────────────────────────────────

#[tokio::test]
async fn list_tools_returns_named_tools() {
    let service = test_service(&[]);
    let tools = service.list_tools().await;

    let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, ["echo", "sleep", "exit", "garbage", "mismatch", "fail"]);
    assert_eq!(tools[0].description, "Echoes input");
    assert!(tools[0].input_schema.is_none());
    assert!(tools[1].input_schema.is_some());
    service.shutdown().await;
}

#[tokio::test]
async fn call_tool_shapes_result() {
    let service = test_service(&[]);
    let result = service.call_tool("echo", json!({"text": "hello"})).await;

    assert!(result.success);
    assert_eq!(result.text_content.as_deref(), Some("hello"));
    assert_eq!(result.content_type.as_deref(), Some("text"));
    service.shutdown().await;
}

#[tokio::test]
async fn call_tool_rpc_error_is_failure_envelope() {
    let service = test_service(&[]);
    let result = service.call_tool("fail", json!({})).await;

    assert!(!result.success);
    assert!(result.error.as_deref().unwrap_or("").contains("tool failed on request"));
    assert!(service.is_connected(), "rpc errors keep the connection");
    service.shutdown().await;
}

#[tokio::test]
async fn resources_and_prompts() {
    let service = test_service(&[]);

    let resources = service.list_resources().await;
    assert_eq!(resources.len(), 1);
    assert_eq!(resources[0].uri, "memo://readme");

    let content = service.read_resource("memo://readme").await;
    assert!(content.success);
    assert_eq!(content.text_content.as_deref(), Some("hello from the test server"));

    let missing = service.read_resource("memo://nope").await;
    assert!(!missing.success);

    let prompts = service.list_prompts().await;
    assert_eq!(prompts.len(), 1);
    assert_eq!(prompts[0].arguments, ["text", "style"]);
    service.shutdown().await;
}

#[tokio::test]
async fn unreachable_server_degrades_to_empty_results() {
    let settings = ServiceSettings {
        program: "/definitely/not/a/real/binary".into(),
        ..service_settings(&[], fast_options())
    };
    let service = McpService::new(settings);

    assert!(service.list_tools().await.is_empty());
    assert!(service.list_resources().await.is_empty());
    assert!(service.list_prompts().await.is_empty());

    let result = service.call_tool("echo", json!({})).await;
    assert!(!result.success);
    assert!(result.error.as_deref().unwrap_or("").starts_with("connect:"));

    let content = service.read_resource("memo://readme").await;
    assert!(!content.success);
    assert!(!service.is_connected());
}

// ── Recovery ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn fatal_call_error_triggers_fresh_connection() {
    let options = ConnectionOptions {
        call_timeout: Duration::from_millis(300),
        shutdown_grace: Duration::from_millis(200),
        ..fast_options()
    };
    let service = McpService::new(service_settings(&[], options));

    let first = service.ensure_ready().await.expect("ready");
    let first_pid = first.pid().expect("pid");

    let timed_out = service.call_tool("sleep", json!({"millis": 5000})).await;
    assert!(!timed_out.success);
    assert!(timed_out.error.as_deref().unwrap_or("").starts_with("call timeout"));
    assert!(!service.is_connected());

    let result = service.call_tool("echo", json!({"text": "back"})).await;
    assert!(result.success, "next call reconnects: {:?}", result.error);
    assert_eq!(service.build_attempts(), 2);
    let second_pid = service.current_pid().expect("pid");
    assert_ne!(first_pid, second_pid, "a new child was spawned");
    service.shutdown().await;
}

#[tokio::test]
async fn abandoned_call_is_not_handed_to_the_next_caller() {
    let service = Arc::new(test_service(&[]));
    service.start().await.expect("start");
    let first_pid = service.current_pid().expect("pid");

    let slow = {
        let service = Arc::clone(&service);
        tokio::spawn(async move { service.call_tool("sleep", json!({"millis": 500})).await })
    };
    tokio::time::sleep(Duration::from_millis(150)).await;
    slow.abort();
    let _ = slow.await;

    assert!(!service.is_connected());
    let result = service.call_tool("echo", json!({"text": "fresh"})).await;
    assert!(result.success, "next caller gets a fresh peer: {:?}", result.error);
    assert_eq!(service.build_attempts(), 2);
    assert_ne!(service.current_pid().expect("pid"), first_pid);
    service.shutdown().await;
}

#[tokio::test]
async fn shutdown_then_use_rebuilds() {
    let service = test_service(&[]);
    service.start().await.expect("start");
    service.shutdown().await;
    service.shutdown().await;

    assert_eq!(service.list_prompts().await.len(), 1);
    assert_eq!(service.build_attempts(), 2);
    service.shutdown().await;
}

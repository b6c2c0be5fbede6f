//! Thin HTTP shell over [`McpService`] and one-shot code execution.
//!
//! Every route maps onto one facade operation and only translates the
//! typed result into a status code:
//!
//! | Route | Operation |
//! |---|---|
//! | `GET /healthz` | liveness |
//! | `GET /api/mcp/status` | [`McpService::status`] |
//! | `GET /api/mcp/tools` | [`McpService::list_tools`] |
//! | `POST /api/mcp/tools/{tool_name}/execute` | [`McpService::call_tool`] |
//! | `GET /api/mcp/resources` | [`McpService::list_resources`] |
//! | `GET /api/mcp/resources/read?uri=` | [`McpService::read_resource`] |
//! | `GET /api/mcp/prompts` | [`McpService::list_prompts`] |
//! | `POST /execute-python` | [`run_code`] |

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::ExecConfig;
use crate::exec::run_code;
use crate::models::ToolInfo;
use crate::service::{McpService, ServiceStatus};
use crate::{AppError, Result};

/// Shared state handed to every handler.
#[derive(Debug)]
pub struct AppState {
    /// The MCP facade.
    pub service: Arc<McpService>,
    /// One-shot execution settings.
    pub exec: ExecConfig,
}

#[derive(Serialize)]
struct ToolList {
    tools: Vec<ToolInfo>,
}

/// Build the router.
#[must_use]
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/mcp/status", get(status))
        .route("/api/mcp/tools", get(list_tools))
        .route("/api/mcp/tools/{tool_name}/execute", post(execute_tool))
        .route("/api/mcp/resources", get(list_resources))
        .route("/api/mcp/resources/read", get(read_resource))
        .route("/api/mcp/prompts", get(list_prompts))
        .route("/execute-python", post(execute_python))
        .with_state(state)
}

/// Bind `bind` and serve until `ct` is cancelled.
///
/// # Errors
///
/// Returns `AppError::Config` if the address cannot be bound, or
/// `AppError::Io` if the server fails.
pub async fn serve(state: Arc<AppState>, bind: &str, ct: CancellationToken) -> Result<()> {
    let listener = TcpListener::bind(bind)
        .await
        .map_err(|err| AppError::Config(format!("failed to bind http on {bind}: {err}")))?;
    serve_listener(listener, state, ct).await
}

/// Serve on an already bound listener until `ct` is cancelled.
///
/// # Errors
///
/// Returns `AppError::Io` if the server fails.
pub async fn serve_listener(
    listener: TcpListener,
    state: Arc<AppState>,
    ct: CancellationToken,
) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "starting http server");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { ct.cancelled().await })
        .await?;
    info!("http server shut down");
    Ok(())
}

// ── Handlers ──────────────────────────────────────────────────────────────

async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok", "message": "service is healthy" }))
}

async fn status(State(state): State<Arc<AppState>>) -> Json<ServiceStatus> {
    Json(state.service.status())
}

async fn list_tools(State(state): State<Arc<AppState>>) -> Json<ToolList> {
    Json(ToolList {
        tools: state.service.list_tools().await,
    })
}

async fn execute_tool(
    State(state): State<Arc<AppState>>,
    Path(tool_name): Path<String>,
    body: Bytes,
) -> Response {
    if let Err(err) = state.service.ensure_ready().await {
        return not_connected(&err);
    }

    // A missing or unparsable body means "no arguments".
    let arguments = serde_json::from_slice::<Value>(&body)
        .ok()
        .filter(|v| !v.is_null())
        .unwrap_or_else(|| json!({}));

    let result = state.service.call_tool(&tool_name, arguments).await;
    let code = if result.success {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };
    (code, Json(result)).into_response()
}

async fn list_resources(State(state): State<Arc<AppState>>) -> Response {
    Json(state.service.list_resources().await).into_response()
}

async fn read_resource(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if let Err(err) = state.service.ensure_ready().await {
        return not_connected(&err);
    }

    let Some(uri) = query.get("uri").filter(|u| !u.is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "error": "uri parameter is required" })),
        )
            .into_response();
    };

    let content = state.service.read_resource(uri).await;
    let code = if content.success {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };
    (code, Json(content)).into_response()
}

async fn list_prompts(State(state): State<Arc<AppState>>) -> Response {
    Json(state.service.list_prompts().await).into_response()
}

async fn execute_python(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let code = serde_json::from_slice::<Value>(&body)
        .ok()
        .and_then(|v| v.get("code").and_then(Value::as_str).map(str::to_owned))
        .filter(|c| !c.is_empty());
    let Some(code) = code else {
        return error_response(StatusCode::BAD_REQUEST, "no code provided");
    };

    match run_code(&code, &state.exec.interpreter, state.exec.timeout()).await {
        Ok(output) => Json(output).into_response(),
        Err(AppError::ExecTimeout(_)) => {
            error_response(StatusCode::REQUEST_TIMEOUT, "code execution timed out")
        }
        Err(err) => {
            warn!(%err, "code execution failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &format!("an internal error occurred: {err}"),
            )
        }
    }
}

fn not_connected(err: &AppError) -> Response {
    warn!(%err, "mcp service unavailable");
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({
            "success": false,
            "error": "mcp service not connected or initialized",
        })),
    )
        .into_response()
}

fn error_response(code: StatusCode, message: &str) -> Response {
    (code, Json(json!({ "error": message }))).into_response()
}

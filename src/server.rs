//! HTTP tool server.
//!
//! Exposes every engine operation as a JSON tool. All tools, built-in and
//! custom, live in one [`ToolRegistry`] and are dispatched through the same
//! `POST /tools/{name}` handler.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/tools/list` | List all registered tools with schemas |
//! | `POST` | `/tools/{name}` | Call any registered tool by name |
//! | `GET`  | `/health` | Health check (returns version and item count) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "validation_error", "message": "query must not be empty" } }
//! ```
//!
//! | Error | Status |
//! |-------|--------|
//! | `Validation`, `ParseFailure` | 400 |
//! | `NotFound`, unknown tool | 404 |
//! | `ConcurrentReindexRejected`, `Cancelled` | 409 |
//! | `StorageUnavailable` | 503 |
//! | anything else | 500 |
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::engine::Engine;
use crate::error::Error;
use crate::traits::{validate_params, ToolContext, ToolInfo, ToolRegistry};

#[derive(Clone)]
struct AppState {
    engine: Arc<Engine>,
    tools: Arc<ToolRegistry>,
    cancel: CancellationToken,
}

/// Serve the built-in tools on `[server].bind` until ctrl-c.
pub async fn run_server(engine: Arc<Engine>) -> anyhow::Result<()> {
    run_server_with_tools(engine, ToolRegistry::with_builtins()).await
}

/// Serve a caller-assembled registry, e.g. built-ins plus custom tools.
///
/// ```rust,no_run
/// use docs_harness::engine::Engine;
/// use docs_harness::server::run_server_with_tools;
/// use docs_harness::traits::ToolRegistry;
/// use std::sync::Arc;
///
/// # async fn example(engine: Arc<Engine>) -> anyhow::Result<()> {
/// let mut tools = ToolRegistry::with_builtins();
/// // tools.register(Box::new(MyTool::new()));
/// run_server_with_tools(engine, tools).await?;
/// # Ok(())
/// # }
/// ```
pub async fn run_server_with_tools(engine: Arc<Engine>, tools: ToolRegistry) -> anyhow::Result<()> {
    let bind_addr = engine.config().server.bind.clone();
    let cancel = CancellationToken::new();
    let app = build_router_with_cancel(engine, tools, cancel.clone());

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "tool server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for ctrl-c");
                return;
            }
            info!("shutting down");
            cancel.cancel();
        })
        .await?;

    Ok(())
}

/// The router without a listener, for embedding and tests.
pub fn build_router(engine: Arc<Engine>, tools: ToolRegistry) -> Router {
    build_router_with_cancel(engine, tools, CancellationToken::new())
}

fn build_router_with_cancel(engine: Arc<Engine>, tools: ToolRegistry, cancel: CancellationToken) -> Router {
    for t in tools.tools() {
        info!(tool = t.name(), builtin = t.is_builtin(), "registered tool");
    }

    let state = AppState {
        engine,
        tools: Arc::new(tools),
        cancel,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/tools/list", get(handle_list_tools))
        .route("/tools/{name}", post(handle_tool_call))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        let status = match &err {
            Error::Validation(_) | Error::ParseFailure { .. } => StatusCode::BAD_REQUEST,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::ConcurrentReindexRejected | Error::Cancelled => StatusCode::CONFLICT,
            Error::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!(error = %err, "tool call failed");
        }
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    items: usize,
    reindexing: bool,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        items: state.engine.snapshot().len(),
        reindexing: state.engine.is_reindexing(),
    })
}

// ============ GET /tools/list ============

#[derive(Serialize)]
struct ToolListResponse {
    tools: Vec<ToolInfo>,
}

async fn handle_list_tools(State(state): State<AppState>) -> Json<ToolListResponse> {
    Json(ToolListResponse {
        tools: state.tools.list(),
    })
}

// ============ POST /tools/{name} ============

async fn handle_tool_call(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(params): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, AppError> {
    let tool = state.tools.find(&name).ok_or_else(|| AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: format!("no tool registered with name: {}", name),
    })?;

    let params = validate_params(&tool.parameters_schema(), &params)?;

    let ctx = ToolContext::with_cancel(state.engine.clone(), state.cancel.clone());
    let result = tool.execute(params, &ctx).await?;

    Ok(Json(serde_json::json!({ "result": result })))
}

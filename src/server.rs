use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{ConnectInfo, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};

use crate::config::RuntimeConfig;
use crate::protocol::{
    INVALID_PARAMS, JsonRpcResponse, MCP_PROTOCOL_VERSION, METHOD_NOT_FOUND, PARSE_ERROR,
};
use crate::registry::{CallerContext, ToolRegistry, mcp_tool_entry};
use crate::telemetry::TelemetrySink;

pub const SERVER_NAME: &str = "meridian-mcp";

#[derive(Clone)]
pub struct McpServerState {
    pub registry: Arc<ToolRegistry>,
    pub telemetry: TelemetrySink,
}

/// Stateless JSON-RPC dispatch: one request body in, one envelope out.
pub async fn dispatch_rpc(
    state: &McpServerState,
    caller: CallerContext,
    body: &str,
) -> JsonRpcResponse {
    // Unparseable top-level JSON can carry no trustworthy id.
    let request: Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(err) => {
            return JsonRpcResponse::err(Value::Null, PARSE_ERROR, format!("parse error: {err}"));
        }
    };

    let id = request.get("id").cloned().unwrap_or(Value::Null);
    let method = request
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let params = request.get("params").cloned().unwrap_or(Value::Null);

    match method {
        "initialize" => JsonRpcResponse::ok(id, initialize_result()),
        "tools/list" => JsonRpcResponse::ok(id, tools_list_result(&state.registry)),
        "tools/call" => handle_tools_call(state, caller, id, &params).await,
        other => JsonRpcResponse::err(
            id,
            METHOD_NOT_FOUND,
            format!("method not found: '{other}'"),
        ),
    }
}

fn initialize_result() -> Value {
    json!({
        "protocolVersion": MCP_PROTOCOL_VERSION,
        "capabilities": {"tools": {}},
        "serverInfo": {
            "name": SERVER_NAME,
            "version": env!("CARGO_PKG_VERSION"),
        },
    })
}

fn tools_list_result(registry: &ToolRegistry) -> Value {
    json!({
        "tools": registry.specs().iter().map(mcp_tool_entry).collect::<Vec<Value>>(),
    })
}

async fn handle_tools_call(
    state: &McpServerState,
    caller: CallerContext,
    id: Value,
    params: &Value,
) -> JsonRpcResponse {
    let Some(name) = params.get("name").and_then(Value::as_str) else {
        return JsonRpcResponse::err(id, INVALID_PARAMS, "tool name is required for tools/call");
    };

    let args_json = match params.get("arguments") {
        None | Some(Value::Null) => "{}".to_string(),
        Some(value) => value.to_string(),
    };

    state.telemetry.emit(
        "tool.requested",
        json!({"tool": name, "transport": "mcp", "caller_ip": caller.client_ip.clone()}),
    );

    // A tool failure is a result, not a protocol failure: the registry has
    // already converted it to text by the time we get here.
    let text = state.registry.execute(name, &args_json, caller).await;
    JsonRpcResponse::ok(
        id,
        json!({"content": [{"type": "text", "text": text}]}),
    )
}

pub async fn handle_rpc(
    State(state): State<Arc<McpServerState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    body: String,
) -> Json<JsonRpcResponse> {
    let caller = CallerContext {
        client_ip: Some(addr.ip().to_string()),
    };
    Json(dispatch_rpc(&state, caller, &body).await)
}

pub async fn handle_health(State(state): State<Arc<McpServerState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "server": SERVER_NAME,
        "tools": state.registry.len(),
    }))
}

pub fn build_mcp_router(state: Arc<McpServerState>) -> Router {
    Router::new()
        .route("/healthz", get(handle_health))
        .route("/mcp", post(handle_rpc))
        .with_state(state)
}

pub async fn run_server(
    cfg: &RuntimeConfig,
    registry: ToolRegistry,
    telemetry: &TelemetrySink,
) -> Result<()> {
    let addr = format!("{}:{}", cfg.server_host, cfg.server_port)
        .parse::<SocketAddr>()
        .with_context(|| {
            format!(
                "invalid server bind address '{}:{}'",
                cfg.server_host, cfg.server_port
            )
        })?;

    let state = Arc::new(McpServerState {
        registry: Arc::new(registry),
        telemetry: telemetry.clone(),
    });

    telemetry.emit(
        "server.started",
        json!({
            "host": cfg.server_host.clone(),
            "port": cfg.server_port,
            "tools": state.registry.len(),
        }),
    );

    println!(
        "MCP server listening on http://{addr} (endpoint: /mcp, health: /healthz, tools: {})",
        state.registry.len()
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind MCP server listener")?;
    axum::serve(
        listener,
        build_mcp_router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("MCP server runtime failed")
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { println!("\nReceived Ctrl+C, shutting down gracefully..."); }
        _ = terminate => { println!("\nReceived SIGTERM, shutting down gracefully..."); }
    }
}

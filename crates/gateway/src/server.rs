use std::{future::Future, net::SocketAddr, sync::Arc};

use {
    axum::{
        Router,
        body::Bytes,
        extract::State,
        http::StatusCode,
        response::{IntoResponse, Json, Response},
        routing::{get, post},
    },
    serde_json::{Value, json},
    tokio::net::TcpListener,
    tower_http::{
        cors::{Any, CorsLayer},
        trace::TraceLayer,
    },
    tracing::info,
};

use gridctl_mcp::types::{
    INVALID_REQUEST, JsonRpcMessage, JsonRpcResponse, PARSE_ERROR, PROTOCOL_VERSION,
};

use crate::{methods, state::GatewayState};

// ── Router ───────────────────────────────────────────────────────────────────

/// Build the gateway router (shared between the daemon and tests).
pub fn build_gateway_app(state: Arc<GatewayState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/mcp", post(mcp_handler))
        .route("/health", get(health_handler))
        .route("/api/servers", get(servers_handler))
        .route("/api/tools", get(tools_handler))
        .route("/api/refresh", post(refresh_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve `app` on an already-bound listener until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// Startup banner.
pub fn log_banner(state: &GatewayState, addr: SocketAddr) {
    let servers = state.gateway.servers();
    let available = servers.iter().filter(|s| s.available).count();
    let lines = [
        format!("gridctl gateway v{}", state.version),
        format!("topology {}, listening on {}", state.topology, addr),
        format!("protocol {PROTOCOL_VERSION}, endpoint http://{addr}/mcp"),
        format!(
            "{available}/{} servers available, {} tools",
            servers.len(),
            state.gateway.tool_count()
        ),
    ];
    let width = lines.iter().map(|l| l.len()).max().unwrap_or(0) + 4;
    info!("┌{}┐", "─".repeat(width));
    for line in &lines {
        info!("│  {:<w$}│", line, w = width - 2);
    }
    info!("└{}┘", "─".repeat(width));
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn mcp_handler(State(state): State<Arc<GatewayState>>, body: Bytes) -> Response {
    let raw: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            let resp = JsonRpcResponse::failure(Value::Null, PARSE_ERROR, format!("parse error: {e}"));
            return Json(resp).into_response();
        },
    };

    match raw {
        Value::Array(batch) => {
            let mut responses = Vec::with_capacity(batch.len());
            for item in batch {
                if let Some(resp) = handle_one(&state, item).await {
                    responses.push(resp);
                }
            }
            if responses.is_empty() {
                StatusCode::ACCEPTED.into_response()
            } else {
                Json(responses).into_response()
            }
        },
        single => match handle_one(&state, single).await {
            Some(resp) => Json(resp).into_response(),
            None => StatusCode::ACCEPTED.into_response(),
        },
    }
}

async fn handle_one(state: &GatewayState, raw: Value) -> Option<JsonRpcResponse> {
    let id = raw.get("id").cloned();
    match serde_json::from_value::<JsonRpcMessage>(raw) {
        Ok(msg) => methods::dispatch(state, msg).await,
        Err(e) => Some(JsonRpcResponse::failure(
            id.unwrap_or(Value::Null),
            INVALID_REQUEST,
            format!("invalid request: {e}"),
        )),
    }
}

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "topology": state.topology,
        "version": state.version,
        "uptimeSecs": state.uptime_secs(),
        "tools": state.gateway.tool_count(),
    }))
}

async fn servers_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(state.gateway.servers())
}

async fn tools_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(state.gateway.tools())
}

async fn refresh_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(state.gateway.refresh().await)
}

//! JSON-RPC dispatch for the gateway's own MCP surface.

use {
    serde_json::{Value, json},
    tracing::{debug, warn},
};

use gridctl_mcp::{
    GatewayError, McpToolDef, ToolCallResult,
    types::{
        INTERNAL_ERROR, INVALID_PARAMS, JsonRpcError, JsonRpcMessage, JsonRpcResponse,
        METHOD_NOT_FOUND, PROTOCOL_VERSION, ToolsCallParams,
    },
};

use crate::state::GatewayState;

/// The result a method handler produces.
pub type MethodResult = Result<Value, JsonRpcError>;

fn rpc_error(code: i64, message: impl Into<String>) -> JsonRpcError {
    JsonRpcError {
        code,
        message: message.into(),
        data: None,
    }
}

/// Handle one inbound message. Notifications produce no response.
pub async fn dispatch(state: &GatewayState, msg: JsonRpcMessage) -> Option<JsonRpcResponse> {
    let Some(id) = msg.id else {
        debug!(method = %msg.method, "client notification");
        return None;
    };

    let result = match msg.method.as_str() {
        "initialize" => Ok(initialize(state)),
        "ping" => Ok(json!({})),
        "tools/list" => Ok(tools_list(state)),
        "tools/call" => tools_call(state, msg.params).await,
        other => Err(rpc_error(
            METHOD_NOT_FOUND,
            format!("method '{other}' not found"),
        )),
    };

    Some(match result {
        Ok(value) => JsonRpcResponse::success(id, value),
        Err(err) => JsonRpcResponse::failure(id, err.code, err.message),
    })
}

fn initialize(state: &GatewayState) -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": { "tools": { "listChanged": false } },
        "serverInfo": { "name": "gridctl", "version": state.version },
    })
}

fn tools_list(state: &GatewayState) -> Value {
    let tools: Vec<McpToolDef> = state
        .gateway
        .tools()
        .into_iter()
        .map(|t| McpToolDef {
            name: t.name,
            description: t.description,
            input_schema: t.input_schema,
        })
        .collect();
    json!({ "tools": tools })
}

async fn tools_call(state: &GatewayState, params: Option<Value>) -> MethodResult {
    let params: ToolsCallParams = params
        .ok_or_else(|| rpc_error(INVALID_PARAMS, "missing params"))
        .and_then(|p| {
            serde_json::from_value(p)
                .map_err(|e| rpc_error(INVALID_PARAMS, format!("invalid params: {e}")))
        })?;
    let arguments = match params.arguments {
        Value::Null => json!({}),
        other => other,
    };

    let result = match state.gateway.call_tool(&params.name, arguments).await {
        Ok(result) => result,
        Err(GatewayError::ToolNotFound(name)) => {
            return Err(rpc_error(INVALID_PARAMS, format!("unknown tool: {name}")));
        },
        // Backend failures are tool results so the client's model can see them.
        Err(e) => {
            warn!(tool = %params.name, error = %e, "tool call failed");
            ToolCallResult::error_text(e.to_string())
        },
    };
    serde_json::to_value(result).map_err(|e| rpc_error(INTERNAL_ERROR, e.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {
        super::*,
        crate::tests_support::StaticBackend,
        gridctl_mcp::{Gateway, GatewayConfig, McpBackend},
        std::sync::Arc,
    };

    async fn state() -> Arc<GatewayState> {
        let backends: Vec<Arc<dyn McpBackend>> = vec![
            StaticBackend::new("files", &["read_file"]),
            StaticBackend::new("search", &["query"]),
        ];
        let gateway = Arc::new(Gateway::new(backends, GatewayConfig::default()));
        gateway.refresh().await;
        GatewayState::new("demo", gateway)
    }

    fn request(id: u64, method: &str, params: Value) -> JsonRpcMessage {
        serde_json::from_value(json!({
            "jsonrpc": "2.0", "id": id, "method": method, "params": params
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn initialize_reports_gridctl() {
        let state = state().await;
        let resp = dispatch(&state, request(1, "initialize", json!({})))
            .await
            .unwrap();
        let result = resp.result.unwrap();
        assert_eq!(result["serverInfo"]["name"], "gridctl");
        assert_eq!(result["protocolVersion"], PROTOCOL_VERSION);
    }

    #[tokio::test]
    async fn notifications_get_no_response() {
        let state = state().await;
        let msg: JsonRpcMessage = serde_json::from_value(json!({
            "jsonrpc": "2.0", "method": "notifications/initialized"
        }))
        .unwrap();
        assert!(dispatch(&state, msg).await.is_none());
    }

    #[tokio::test]
    async fn tools_list_uses_exposed_names() {
        let state = state().await;
        let resp = dispatch(&state, request(2, "tools/list", json!({})))
            .await
            .unwrap();
        let names: Vec<String> = resp.result.unwrap()["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["files__read_file", "search__query"]);
    }

    #[tokio::test]
    async fn tools_call_routes_and_rejects_unknown() {
        let state = state().await;
        let resp = dispatch(
            &state,
            request(3, "tools/call", json!({"name": "search__query", "arguments": {"q": "rust"}})),
        )
        .await
        .unwrap();
        let result = resp.result.unwrap();
        assert_eq!(result["isError"], false);
        assert_eq!(result["content"][0]["text"], "search:query");

        let resp = dispatch(&state, request(4, "tools/call", json!({"name": "nope"})))
            .await
            .unwrap();
        assert_eq!(resp.error.unwrap().code, INVALID_PARAMS);
    }

    #[tokio::test]
    async fn unknown_method() {
        let state = state().await;
        let resp = dispatch(&state, request(5, "resources/list", json!({})))
            .await
            .unwrap();
        assert_eq!(resp.error.unwrap().code, METHOD_NOT_FOUND);
    }
}

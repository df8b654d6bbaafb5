//! Streamable-HTTP transport: JSON-RPC over POST with JSON or SSE responses.

use std::{
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    reqwest::{
        Client, RequestBuilder, Response,
        header::{ACCEPT, CONTENT_TYPE},
    },
    serde_json::Value,
    tracing::{debug, trace},
};

use crate::{
    error::McpError,
    transport::{DEFAULT_REQUEST_TIMEOUT, McpTransport, into_result},
    types::{JSONRPC_VERSION, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse},
};

pub const SESSION_HEADER: &str = "Mcp-Session-Id";

/// HTTP transport for a server listening on a published container port.
pub struct HttpTransport {
    client: Client,
    endpoint: String,
    session_id: Mutex<Option<String>>,
    next_id: AtomicU64,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            session_id: Mutex::new(None),
            next_id: AtomicU64::new(1),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Endpoint of a server on a host port: `http://127.0.0.1:<port>/mcp`.
    pub fn for_host_port(port: u16) -> Self {
        Self::new(format!("http://127.0.0.1:{port}/mcp"))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn post(&self, body: &impl serde::Serialize) -> RequestBuilder {
        let mut req = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .header(ACCEPT, "application/json, text/event-stream")
            .json(body);
        if let Some(session) = self.session_id() {
            req = req.header(SESSION_HEADER, session);
        }
        req
    }

    fn remember_session(&self, resp: &Response) {
        if let Some(session) = resp
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            let mut current = self.session_id.lock().unwrap_or_else(PoisonError::into_inner);
            if current.as_deref() != Some(session) {
                debug!(endpoint = %self.endpoint, session, "MCP session established");
                *current = Some(session.to_string());
            }
        }
    }

    async fn send(&self, body: &impl serde::Serialize, method: &str) -> Result<Response, McpError> {
        let resp = self.post(body).send().await.map_err(|e| {
            if e.is_timeout() {
                McpError::Timeout {
                    method: method.into(),
                }
            } else {
                McpError::Request(e)
            }
        })?;
        self.remember_session(&resp);

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(McpError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp)
    }
}

/// Pick the response for `id` out of an SSE body.
fn response_from_sse(body: &str, id: &Value) -> Result<JsonRpcResponse, McpError> {
    body.split("\n\n")
        .filter_map(|event| {
            let data: Vec<&str> = event
                .lines()
                .filter_map(|l| l.strip_prefix("data:"))
                .map(str::trim_start)
                .collect();
            (!data.is_empty()).then(|| data.join("\n"))
        })
        .filter_map(|data| serde_json::from_str::<JsonRpcResponse>(&data).ok())
        .find(|resp| &resp.id == id)
        .ok_or_else(|| McpError::Protocol("no response for request in event stream".into()))
}

#[async_trait]
impl McpTransport for HttpTransport {
    async fn request(&self, method: &str, params: Option<Value>) -> Result<JsonRpcResponse, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let req = JsonRpcRequest::new(id, method, params);
        trace!(endpoint = %self.endpoint, method, id, "client -> MCP server");

        let resp = self.send(&req, method).await?;
        let is_sse = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));
        let body = resp.text().await?;

        let parsed = if is_sse {
            response_from_sse(&body, &req.id)?
        } else {
            serde_json::from_str(&body)?
        };
        into_result(parsed)
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        trace!(endpoint = %self.endpoint, method, "client -> MCP server (notification)");
        self.send(
            &JsonRpcNotification {
                jsonrpc: JSONRPC_VERSION.into(),
                method: method.into(),
                params,
            },
            method,
        )
        .await
        .map(drop)
    }

    async fn close(&self) {
        let Some(session) = self.session_id() else {
            return;
        };
        // Best effort: tell the server the session is over.
        let _ = self
            .client
            .delete(&self.endpoint)
            .timeout(self.timeout)
            .header(SESSION_HEADER, session)
            .send()
            .await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {super::*, mockito::Matcher, serde_json::json};

    #[tokio::test]
    async fn json_response_and_session_echo() {
        let mut server = mockito::Server::new_async().await;
        let init = server
            .mock("POST", "/mcp")
            .match_body(Matcher::PartialJson(json!({"method": "initialize"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_header("mcp-session-id", "sess-1")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":{"ok":true}}"#)
            .create_async()
            .await;
        let list = server
            .mock("POST", "/mcp")
            .match_header("mcp-session-id", "sess-1")
            .match_body(Matcher::PartialJson(json!({"method": "tools/list"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsonrpc":"2.0","id":2,"result":{"tools":[]}}"#)
            .create_async()
            .await;

        let transport = HttpTransport::new(format!("{}/mcp", server.url()));
        let resp = transport.request("initialize", None).await.unwrap();
        assert_eq!(resp.result.unwrap()["ok"], true);
        assert_eq!(transport.session_id().as_deref(), Some("sess-1"));

        transport.request("tools/list", None).await.unwrap();
        init.assert_async().await;
        list.assert_async().await;
    }

    #[tokio::test]
    async fn sse_response_is_decoded() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/mcp")
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(
                "event: message\ndata: {\"jsonrpc\":\"2.0\",\"method\":\"notifications/progress\"}\n\n\
                 event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{\"tools\":[{\"name\":\"search\"}]}}\n\n",
            )
            .create_async()
            .await;

        let transport = HttpTransport::new(format!("{}/mcp", server.url()));
        let resp = transport.request("tools/list", None).await.unwrap();
        assert_eq!(resp.result.unwrap()["tools"][0]["name"], "search");
    }

    #[tokio::test]
    async fn http_error_status_is_reported() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/mcp")
            .with_status(503)
            .with_body("starting")
            .create_async()
            .await;

        let transport = HttpTransport::new(format!("{}/mcp", server.url()));
        let err = transport.request("initialize", None).await.unwrap_err();
        assert!(matches!(err, McpError::Http { status: 503, ref body } if body == "starting"));
    }

    #[tokio::test]
    async fn rpc_error_object_is_surfaced() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/mcp")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32602,"message":"bad args"}}"#)
            .create_async()
            .await;

        let transport = HttpTransport::new(format!("{}/mcp", server.url()));
        let err = transport.request("tools/call", None).await.unwrap_err();
        assert!(matches!(err, McpError::Rpc { code: -32602, .. }));
    }

    #[test]
    fn host_port_endpoint() {
        assert_eq!(
            HttpTransport::for_host_port(49153).endpoint(),
            "http://127.0.0.1:49153/mcp"
        );
    }
}

//! MCP client: manages the protocol handshake and tool interactions with a single MCP server.

use std::{
    collections::HashSet,
    sync::{Arc, PoisonError, RwLock},
};

use {
    async_trait::async_trait,
    gridctl_config::Transport,
    serde_json::Value,
    tracing::{debug, info, warn},
};

use crate::{
    error::McpError,
    transport::McpTransport,
    types::{
        ClientCapabilities, Implementation, InitializeParams, InitializeResult, McpToolDef,
        PROTOCOL_VERSION, ToolCallResult, ToolsCallParams, ToolsListResult,
    },
};

/// One backend connection as the gateway sees it.
#[async_trait]
pub trait McpBackend: Send + Sync {
    /// Server name from the topology.
    fn name(&self) -> &str;

    fn transport(&self) -> Transport;

    /// Open the session: `initialize` followed by `notifications/initialized`.
    async fn initialize(&self) -> Result<(), McpError>;

    /// Re-query `tools/list` and replace the cached catalog.
    async fn refresh_tools(&self) -> Result<Vec<McpToolDef>, McpError>;

    /// Last successfully fetched catalog. No I/O.
    fn tools(&self) -> Vec<McpToolDef>;

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolCallResult, McpError>;

    fn is_initialized(&self) -> bool;

    fn server_info(&self) -> Option<Implementation>;

    async fn close(&self) {}
}

/// State of an MCP client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McpClientState {
    /// Transport open, not yet initialized.
    Connected,
    /// `initialize` completed, `initialized` notification sent.
    Ready,
    /// Connection shut down.
    Closed,
}

struct Inner {
    state: McpClientState,
    server_info: Option<InitializeResult>,
    tools: Vec<McpToolDef>,
}

/// An MCP client connected to a single server over any [`McpTransport`].
pub struct McpClient {
    server_name: String,
    transport_kind: Transport,
    transport: Arc<dyn McpTransport>,
    inner: RwLock<Inner>,
}

impl McpClient {
    pub fn new(
        server_name: impl Into<String>,
        transport_kind: Transport,
        transport: Arc<dyn McpTransport>,
    ) -> Self {
        Self {
            server_name: server_name.into(),
            transport_kind,
            transport,
            inner: RwLock::new(Inner {
                state: McpClientState::Connected,
                server_info: None,
                tools: Vec::new(),
            }),
        }
    }

    pub fn state(&self) -> McpClientState {
        self.read().state
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_ready(&self) -> Result<(), McpError> {
        match self.state() {
            McpClientState::Ready => Ok(()),
            McpClientState::Closed => Err(McpError::Closed),
            McpClientState::Connected => Err(McpError::NotInitialized {
                server: self.server_name.clone(),
            }),
        }
    }
}

fn result_of<T: serde::de::DeserializeOwned>(
    method: &str,
    result: Option<Value>,
) -> Result<T, McpError> {
    let value = result.ok_or_else(|| McpError::Protocol(format!("{method} returned no result")))?;
    serde_json::from_value(value)
        .map_err(|e| McpError::Protocol(format!("invalid {method} result: {e}")))
}

#[async_trait]
impl McpBackend for McpClient {
    fn name(&self) -> &str {
        &self.server_name
    }

    fn transport(&self) -> Transport {
        self.transport_kind
    }

    async fn initialize(&self) -> Result<(), McpError> {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.into(),
            capabilities: ClientCapabilities::default(),
            client_info: Implementation {
                name: "gridctl".into(),
                version: env!("CARGO_PKG_VERSION").into(),
            },
        };

        let resp = self
            .transport
            .request("initialize", Some(serde_json::to_value(&params)?))
            .await?;
        let result: InitializeResult = result_of("initialize", resp.result)?;

        info!(
            server = %self.server_name,
            transport = %self.transport_kind,
            protocol = %result.protocol_version,
            server_name = %result.server_info.name,
            "MCP server initialized"
        );

        self.transport
            .notify("notifications/initialized", None)
            .await?;

        let mut inner = self.write();
        inner.server_info = Some(result);
        inner.state = McpClientState::Ready;
        Ok(())
    }

    async fn refresh_tools(&self) -> Result<Vec<McpToolDef>, McpError> {
        self.ensure_ready()?;

        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        let mut seen = HashSet::new();
        loop {
            let params = cursor.as_ref().map(|c| serde_json::json!({ "cursor": c }));
            let resp = self.transport.request("tools/list", params).await?;
            let page: ToolsListResult = result_of("tools/list", resp.result)?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if next.is_empty() => break,
                Some(next) if !seen.insert(next.clone()) => {
                    warn!(server = %self.server_name, cursor = %next, "tools/list cursor repeated, stopping");
                    break;
                },
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        debug!(server = %self.server_name, count = tools.len(), "fetched MCP tools");
        self.write().tools = tools.clone();
        Ok(tools)
    }

    fn tools(&self) -> Vec<McpToolDef> {
        self.read().tools.clone()
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolCallResult, McpError> {
        self.ensure_ready()?;

        let params = ToolsCallParams {
            name: name.into(),
            arguments,
        };
        let resp = self
            .transport
            .request("tools/call", Some(serde_json::to_value(&params)?))
            .await?;
        result_of("tools/call", resp.result)
    }

    fn is_initialized(&self) -> bool {
        self.state() == McpClientState::Ready
    }

    fn server_info(&self) -> Option<Implementation> {
        self.read()
            .server_info
            .as_ref()
            .map(|r| r.server_info.clone())
    }

    async fn close(&self) {
        self.write().state = McpClientState::Closed;
        self.transport.close().await;
    }
}

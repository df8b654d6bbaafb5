//! Backend connections to the MCP servers of a deployed topology.

use std::{
    sync::{Arc, PoisonError, RwLock},
    time::Duration,
};

use {
    async_trait::async_trait,
    gridctl_config::{McpServerSpec, Topology, Transport},
    gridctl_mcp::{
        HttpTransport, Implementation, McpBackend, McpClient, McpError, McpToolDef, McpTransport,
        StdioTransport, ToolCallResult,
    },
    gridctl_runtime::{ContainerRuntime, container_name},
    serde_json::Value,
    tracing::debug,
};

/// A server container reached through the runtime. The transport is opened
/// on `initialize` and reopened by the next `initialize` after a connection
/// failure, so a refresh or call retries servers that were down.
pub struct ContainerBackend {
    name: String,
    transport: Transport,
    container: String,
    port: Option<u16>,
    runtime: Arc<dyn ContainerRuntime>,
    timeout: Duration,
    client: RwLock<Option<Arc<McpClient>>>,
}

impl ContainerBackend {
    pub fn new(
        topology: &str,
        server: &McpServerSpec,
        runtime: Arc<dyn ContainerRuntime>,
        timeout: Duration,
    ) -> Self {
        Self {
            name: server.name.clone(),
            transport: server.transport().unwrap_or_default(),
            container: container_name(topology, &server.name),
            port: server.port,
            runtime,
            timeout,
            client: RwLock::new(None),
        }
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    fn client(&self) -> Option<Arc<McpClient>> {
        self.client
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn ready_client(&self) -> Result<Arc<McpClient>, McpError> {
        self.client().ok_or_else(|| McpError::NotInitialized {
            server: self.name.clone(),
        })
    }

    fn set_client(&self, client: Option<Arc<McpClient>>) -> Option<Arc<McpClient>> {
        std::mem::replace(
            &mut *self.client.write().unwrap_or_else(PoisonError::into_inner),
            client,
        )
    }

    async fn open_transport(&self) -> Result<Arc<dyn McpTransport>, McpError> {
        let connect_err = |e: gridctl_runtime::RuntimeError| McpError::Connect(e.to_string());
        match self.transport {
            Transport::Http => {
                let port = self.port.ok_or_else(|| {
                    McpError::Connect(format!("server '{}' declares no port", self.name))
                })?;
                let host_port = self
                    .runtime
                    .host_port(&self.container, port)
                    .await
                    .map_err(connect_err)?;
                let transport = HttpTransport::for_host_port(host_port).with_timeout(self.timeout);
                debug!(server = %self.name, endpoint = transport.endpoint(), "connecting over HTTP");
                Ok(Arc::new(transport))
            },
            Transport::Stdio => {
                let stream = self.runtime.attach(&self.container).await.map_err(connect_err)?;
                let (reader, writer, process) = stream.into_parts();
                debug!(server = %self.name, container = %self.container, "attached to stdio");
                Ok(Arc::new(
                    StdioTransport::new(reader, writer)
                        .with_process(process)
                        .with_timeout(self.timeout),
                ))
            },
        }
    }

    /// Forget a client whose connection broke, so the next refresh or call
    /// reconnects. Timeouts and server-side errors keep the session.
    async fn drop_if_broken<T>(&self, result: Result<T, McpError>) -> Result<T, McpError> {
        if let Err(e) = &result
            && e.is_connection_failure()
            && let Some(old) = self.set_client(None)
        {
            debug!(server = %self.name, error = %e, "dropping broken connection");
            old.close().await;
        }
        result
    }
}

#[async_trait]
impl McpBackend for ContainerBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn transport(&self) -> Transport {
        self.transport
    }

    async fn initialize(&self) -> Result<(), McpError> {
        if let Some(old) = self.set_client(None) {
            old.close().await;
        }
        let transport = self.open_transport().await?;
        let client = Arc::new(McpClient::new(&self.name, self.transport, transport));
        if let Err(e) = client.initialize().await {
            client.close().await;
            return Err(e);
        }
        self.set_client(Some(client));
        Ok(())
    }

    async fn refresh_tools(&self) -> Result<Vec<McpToolDef>, McpError> {
        let client = self.ready_client()?;
        let result = client.refresh_tools().await;
        self.drop_if_broken(result).await
    }

    fn tools(&self) -> Vec<McpToolDef> {
        self.client().map(|c| c.tools()).unwrap_or_default()
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolCallResult, McpError> {
        let client = self.ready_client()?;
        let result = client.call_tool(name, arguments).await;
        self.drop_if_broken(result).await
    }

    fn is_initialized(&self) -> bool {
        self.client().is_some_and(|c| c.is_initialized())
    }

    fn server_info(&self) -> Option<Implementation> {
        self.client().and_then(|c| c.server_info())
    }

    async fn close(&self) {
        if let Some(client) = self.set_client(None) {
            client.close().await;
        }
    }
}

/// One lazily-connected backend per MCP server in the topology.
pub fn backends_for(
    topology: &Topology,
    runtime: &Arc<dyn ContainerRuntime>,
    timeout: Duration,
) -> Vec<Arc<dyn McpBackend>> {
    topology
        .mcp_servers
        .iter()
        .map(|server| {
            Arc::new(ContainerBackend::new(
                &topology.name,
                server,
                Arc::clone(runtime),
                timeout,
            )) as Arc<dyn McpBackend>
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {
        super::*,
        crate::tests_support::spawn_stdio_server,
        gridctl_mcp::{Gateway, GatewayConfig, GatewayError},
        gridctl_runtime::{MemoryRuntime, Orchestrator, SourceBuilder},
        serde_json::json,
        tokio::task::JoinHandle,
    };

    struct NoBuild;

    #[async_trait]
    impl SourceBuilder for NoBuild {
        async fn build(
            &self,
            _runtime: &dyn ContainerRuntime,
            _topology: &str,
            _server: &McpServerSpec,
        ) -> anyhow::Result<String> {
            anyhow::bail!("no builds in tests")
        }
    }

    fn topology() -> Topology {
        Topology {
            name: "demo".into(),
            network: gridctl_config::Network {
                name: "demo-net".into(),
                driver: "bridge".into(),
            },
            mcp_servers: vec![
                McpServerSpec {
                    name: "files".into(),
                    image: "ghcr.io/acme/files".into(),
                    transport: "stdio".into(),
                    ..Default::default()
                },
                McpServerSpec {
                    name: "search".into(),
                    image: "ghcr.io/acme/search".into(),
                    port: Some(8080),
                    ..Default::default()
                },
            ],
            ..Default::default()
        }
    }

    async fn deployed() -> (Arc<MemoryRuntime>, Arc<dyn ContainerRuntime>) {
        let memory = Arc::new(MemoryRuntime::new());
        let runtime: Arc<dyn ContainerRuntime> = memory.clone();
        Orchestrator::with_builder(Arc::clone(&runtime), Arc::new(NoBuild))
            .up(&topology())
            .await
            .unwrap();
        (memory, runtime)
    }

    /// Serve the next attach to `container` with a fixture MCP server.
    async fn serve_next_attach(
        memory: &MemoryRuntime,
        container: &str,
        tools: Vec<&'static str>,
    ) -> JoinHandle<()> {
        loop {
            if let Some(stream) = memory.take_attached(container) {
                return spawn_stdio_server(stream, tools);
            }
            tokio::task::yield_now().await;
        }
    }

    async fn kill(server: JoinHandle<()>) {
        server.abort();
        let _ = server.await;
    }

    fn tool_names(gateway: &Gateway) -> Vec<String> {
        gateway.tools().into_iter().map(|t| t.name).collect()
    }

    #[tokio::test]
    async fn stdio_backend_reconnects_after_session_breaks() {
        let (memory, runtime) = deployed().await;
        let backends = backends_for(&topology(), &runtime, Duration::from_secs(5));
        let files = Arc::clone(&backends[0]);
        let gateway = Gateway::new(vec![Arc::clone(&files)], GatewayConfig::default());
        let container = "gridctl-demo-files";

        let (report, server) = tokio::join!(
            gateway.refresh(),
            serve_next_attach(&memory, container, vec!["read_file"])
        );
        assert_eq!(report.available, vec!["files"]);
        assert_eq!(tool_names(&gateway), vec!["files__read_file"]);

        // Session drops; the next refresh attaches again.
        kill(server).await;
        let err = files.refresh_tools().await.unwrap_err();
        assert!(err.is_connection_failure());
        assert!(!files.is_initialized());

        let (report, server) = tokio::join!(
            gateway.refresh(),
            serve_next_attach(&memory, container, vec!["read_file", "stat"])
        );
        assert_eq!(report.available, vec!["files"]);
        assert_eq!(tool_names(&gateway), vec!["files__read_file", "files__stat"]);

        // Session drops mid-use; the failed call takes the tools out and the
        // next call attaches again.
        kill(server).await;
        let err = gateway
            .call_tool("files__stat", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::BackendUnavailable { .. }));
        assert!(gateway.tools().is_empty());

        let (result, _server) = tokio::join!(
            gateway.call_tool("files__stat", json!({"p": 3})),
            serve_next_attach(&memory, container, vec!["read_file", "stat"])
        );
        let result = result.unwrap();
        assert!(!result.is_error);
        assert_eq!(tool_names(&gateway), vec!["files__read_file", "files__stat"]);
    }

    #[tokio::test]
    async fn stdio_backend_attaches_and_lists_tools() {
        let (memory, runtime) = deployed().await;
        let backends = backends_for(&topology(), &runtime, Duration::from_secs(5));
        let files = &backends[0];
        assert_eq!(files.name(), "files");
        assert!(!files.is_initialized());

        let init = files.initialize();
        // The attach happens inside `initialize`; serve the container side
        // once it exists.
        let serve = async {
            loop {
                if let Some(stream) = memory.take_attached("gridctl-demo-files") {
                    spawn_stdio_server(stream, vec!["read_file"]);
                    break;
                }
                tokio::task::yield_now().await;
            }
        };
        let (init, ()) = tokio::join!(init, serve);
        init.unwrap();

        let tools = files.refresh_tools().await.unwrap();
        assert_eq!(tools[0].name, "read_file");
        let result = files.call_tool("read_file", json!({"p": 1})).await.unwrap();
        assert!(!result.is_error);
    }

    #[tokio::test]
    async fn http_backend_without_server_fails_to_connect() {
        let (_memory, runtime) = deployed().await;
        let backends = backends_for(&topology(), &runtime, Duration::from_millis(500));
        let search = &backends[1];

        // Nothing listens on the allocated host port.
        let err = search.initialize().await.unwrap_err();
        assert!(err.is_connection_failure());
        assert!(!search.is_initialized());
        assert!(search.tools().is_empty());
    }

    #[tokio::test]
    async fn missing_container_is_a_connect_error() {
        let memory = Arc::new(MemoryRuntime::new());
        let runtime: Arc<dyn ContainerRuntime> = memory;
        let backends = backends_for(&topology(), &runtime, Duration::from_secs(1));
        assert!(matches!(
            backends[0].initialize().await,
            Err(McpError::Connect(_))
        ));
    }
}

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use {
    async_trait::async_trait,
    gridctl_config::Transport,
    gridctl_mcp::{Implementation, McpBackend, McpError, McpToolDef, ToolCallResult},
    serde_json::{Value, json},
    tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, split},
        task::JoinHandle,
    },
};

/// Backend that answers from a fixed tool list; calls return `<server>:<tool>`.
pub(crate) struct StaticBackend {
    name: String,
    tools: Vec<McpToolDef>,
    initialized: AtomicBool,
    down: AtomicBool,
}

impl StaticBackend {
    pub(crate) fn new(name: &str, tools: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            tools: tools
                .iter()
                .map(|t| McpToolDef {
                    name: (*t).into(),
                    description: Some(format!("{t} from {name}")),
                    input_schema: json!({"type": "object"}),
                })
                .collect(),
            initialized: AtomicBool::new(false),
            down: AtomicBool::new(false),
        })
    }

    pub(crate) fn unreachable(name: &str) -> Arc<Self> {
        let backend = Self::new(name, &["anything"]);
        backend.down.store(true, Ordering::SeqCst);
        backend
    }
}

#[async_trait]
impl McpBackend for StaticBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn transport(&self) -> Transport {
        Transport::Http
    }

    async fn initialize(&self) -> Result<(), McpError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(McpError::Connect("connection refused".into()));
        }
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn refresh_tools(&self) -> Result<Vec<McpToolDef>, McpError> {
        Ok(self.tools.clone())
    }

    fn tools(&self) -> Vec<McpToolDef> {
        self.tools.clone()
    }

    async fn call_tool(&self, name: &str, _arguments: Value) -> Result<ToolCallResult, McpError> {
        Ok(ToolCallResult::text(format!("{}:{name}", self.name)))
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    fn server_info(&self) -> Option<Implementation> {
        self.is_initialized().then(|| Implementation {
            name: self.name.clone(),
            version: "1.0.0".into(),
        })
    }
}

/// Line-delimited MCP server on the container side of an attach stream.
/// Tool calls echo their arguments as text. Aborting the task closes the
/// container side of the stream.
pub(crate) fn spawn_stdio_server(stream: DuplexStream, tools: Vec<&'static str>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let (reader, mut writer) = split(stream);
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let msg: Value = serde_json::from_str(&line).unwrap();
            let Some(id) = msg.get("id").cloned() else {
                continue;
            };
            let result = match msg["method"].as_str().unwrap_or_default() {
                "initialize" => json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": {"tools": {}},
                    "serverInfo": {"name": "stdio-fixture", "version": "0.1.0"}
                }),
                "tools/list" => json!({
                    "tools": tools.iter().map(|t| json!({"name": t})).collect::<Vec<_>>()
                }),
                "tools/call" => json!({
                    "content": [{"type": "text", "text": msg["params"]["arguments"].to_string()}]
                }),
                _ => json!({}),
            };
            let resp = json!({"jsonrpc": "2.0", "id": id, "result": result});
            if writer.write_all(format!("{resp}\n").as_bytes()).await.is_err() {
                break;
            }
        }
    })
}

//! Transport abstraction and the line-delimited stdio transport used for
//! attached containers.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    serde_json::Value,
    tokio::{
        io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
        process::Child,
        sync::{Mutex, oneshot},
        task::JoinHandle,
    },
    tracing::{debug, trace, warn},
};

use crate::{
    error::McpError,
    types::{JSONRPC_VERSION, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse},
};

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A JSON-RPC channel to one MCP server.
///
/// Implementations multiplex concurrent requests; callers never need to
/// serialize access.
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Send a request and wait for its response. A JSON-RPC error object in
    /// the response is returned as [`McpError::Rpc`].
    async fn request(&self, method: &str, params: Option<Value>) -> Result<JsonRpcResponse, McpError>;

    /// Send a notification (no response expected).
    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError>;

    /// Release the connection.
    async fn close(&self);
}

pub(crate) fn into_result(resp: JsonRpcResponse) -> Result<JsonRpcResponse, McpError> {
    match resp.error {
        Some(err) => Err(McpError::Rpc {
            code: err.code,
            message: err.message,
        }),
        None => Ok(resp),
    }
}

type Pending = Arc<Mutex<HashMap<String, oneshot::Sender<JsonRpcResponse>>>>;

/// Newline-delimited JSON-RPC over a byte stream pair.
pub struct StdioTransport {
    writer: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
    pending: Pending,
    next_id: AtomicU64,
    closed: Arc<AtomicBool>,
    timeout: Duration,
    reader_handle: Mutex<Option<JoinHandle<()>>>,
    /// Helper process owning the stream (e.g. `docker attach`).
    process: Mutex<Option<Child>>,
}

impl StdioTransport {
    /// Start the reader loop over `reader`; requests are written to `writer`.
    pub fn new(
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let handle = tokio::spawn(read_loop(reader, Arc::clone(&pending), Arc::clone(&closed)));

        Self {
            writer: Mutex::new(Box::new(writer)),
            pending,
            next_id: AtomicU64::new(1),
            closed,
            timeout: DEFAULT_REQUEST_TIMEOUT,
            reader_handle: Mutex::new(Some(handle)),
            process: Mutex::new(None),
        }
    }

    /// Tie a helper process to this transport; it is killed on `close`.
    pub fn with_process(mut self, child: Option<Child>) -> Self {
        self.process = Mutex::new(child);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn write_line(&self, payload: &impl serde::Serialize) -> Result<(), McpError> {
        if self.is_closed() {
            return Err(McpError::Closed);
        }
        let mut line = serde_json::to_string(payload)?;
        line.push('\n');
        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }
}

async fn read_loop(
    reader: impl AsyncRead + Send + Unpin,
    pending: Pending,
    closed: Arc<AtomicBool>,
) {
    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("MCP server stream closed");
                break;
            },
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                trace!(raw = %trimmed, "MCP server -> client");
                dispatch(trimmed, &pending).await;
            },
            Err(e) => {
                warn!(error = %e, "error reading from MCP server stream");
                break;
            },
        }
    }
    closed.store(true, Ordering::SeqCst);
    // Dropping the senders wakes every waiter with `Closed`.
    pending.lock().await.clear();
}

async fn dispatch(raw: &str, pending: &Pending) {
    let value: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            debug!(error = %e, "ignoring non-JSON line from MCP server");
            return;
        },
    };
    // Server-initiated requests and notifications are not supported.
    if value.get("method").is_some() {
        trace!("ignoring server-initiated message");
        return;
    }
    let resp: JsonRpcResponse = match serde_json::from_value(value) {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "malformed JSON-RPC response");
            return;
        },
    };
    let key = resp.id.to_string();
    if let Some(tx) = pending.lock().await.remove(&key) {
        let _ = tx.send(resp);
    } else {
        warn!(id = %key, "received response for unknown request id");
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn request(&self, method: &str, params: Option<Value>) -> Result<JsonRpcResponse, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let req = JsonRpcRequest::new(id, method, params);
        let key = req.id.to_string();

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(key.clone(), tx);

        trace!(method, id, "client -> MCP server");
        if let Err(e) = self.write_line(&req).await {
            self.pending.lock().await.remove(&key);
            return Err(e);
        }

        let resp = match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(_)) => return Err(McpError::Closed),
            Err(_) => {
                self.pending.lock().await.remove(&key);
                return Err(McpError::Timeout {
                    method: method.into(),
                });
            },
        };
        into_result(resp)
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        trace!(method, "client -> MCP server (notification)");
        self.write_line(&JsonRpcNotification {
            jsonrpc: JSONRPC_VERSION.into(),
            method: method.into(),
            params,
        })
        .await
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(handle) = self.reader_handle.lock().await.take() {
            handle.abort();
        }
        self.pending.lock().await.clear();
        if let Some(mut child) = self.process.lock().await.take() {
            let _ = child.kill().await;
        }
    }
}

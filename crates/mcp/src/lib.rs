//! MCP client side: JSON-RPC types, stdio/HTTP transports, the per-server
//! client and the aggregating [`Gateway`].

pub mod client;
pub mod error;
pub mod gateway;
pub mod http;
pub mod transport;
pub mod types;

pub use {
    client::{McpBackend, McpClient},
    error::{GatewayError, McpError},
    gateway::{AggregatedTool, Gateway, GatewayConfig, RefreshReport, ServerStatus, ToolNaming},
    http::HttpTransport,
    transport::{McpTransport, StdioTransport},
    types::{Content, Implementation, McpToolDef, ToolCallResult},
};

use thiserror::Error;

/// Failures talking to one MCP server.
#[derive(Debug, Error)]
pub enum McpError {
    #[error("cannot connect: {0}")]
    Connect(String),

    #[error("transport closed")]
    Closed,

    #[error("'{method}' timed out")]
    Timeout { method: String },

    #[error("server returned error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("client for '{server}' is not initialized")]
    NotInitialized { server: String },

    #[error(transparent)]
    Request(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl McpError {
    /// Whether the failure means the connection itself is unusable, as opposed
    /// to the server rejecting or being slow on one request. A timed-out
    /// request leaves the session intact.
    pub fn is_connection_failure(&self) -> bool {
        !matches!(
            self,
            Self::Rpc { .. } | Self::Protocol(_) | Self::Timeout { .. }
        )
    }
}

/// Failures surfaced by the aggregating gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("tool '{0}' not found")]
    ToolNotFound(String),

    #[error("backend '{server}' is unavailable: {reason}")]
    BackendUnavailable { server: String, reason: String },

    #[error("backend '{server}': {source}")]
    Backend {
        server: String,
        #[source]
        source: McpError,
    },
}

#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case(McpError::Connect("refused".into()), true)]
    #[case(McpError::Closed, true)]
    #[case(McpError::Timeout { method: "tools/call".into() }, false)]
    #[case(McpError::Http { status: 502, body: String::new() }, true)]
    #[case(McpError::Rpc { code: -32602, message: "bad".into() }, false)]
    #[case(McpError::Protocol("no result".into()), false)]
    fn connection_failures(#[case] err: McpError, #[case] expected: bool) {
        assert_eq!(err.is_connection_failure(), expected);
    }
}

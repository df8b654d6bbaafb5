use std::{sync::Arc, time::Instant};

use gridctl_mcp::Gateway;

/// Shared gateway runtime state, wrapped in Arc for use across handlers.
pub struct GatewayState {
    /// Aggregated backend connections.
    pub gateway: Arc<Gateway>,
    /// Topology this gateway serves.
    pub topology: String,
    /// Server version string.
    pub version: String,
    pub started_at: Instant,
}

impl GatewayState {
    pub fn new(topology: impl Into<String>, gateway: Arc<Gateway>) -> Arc<Self> {
        Arc::new(Self {
            gateway,
            topology: topology.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: Instant::now(),
        })
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

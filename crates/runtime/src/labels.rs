//! Ownership labels and deterministic naming for gridctl-managed resources.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{LabelFilter, Labels};

pub const LABEL_MANAGED: &str = "gridctl.managed";
pub const LABEL_TOPOLOGY: &str = "gridctl.topology";
pub const LABEL_MCP_SERVER: &str = "gridctl.mcp-server";
pub const LABEL_RESOURCE: &str = "gridctl.resource";
pub const LABEL_AGENT: &str = "gridctl.agent";

/// Prefix of every managed container name.
pub const CONTAINER_PREFIX: &str = "gridctl";

/// Role a managed container plays in its topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    McpServer,
    Resource,
    Agent,
}

impl Role {
    pub fn label_key(self) -> &'static str {
        match self {
            Self::McpServer => LABEL_MCP_SERVER,
            Self::Resource => LABEL_RESOURCE,
            Self::Agent => LABEL_AGENT,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::McpServer => "mcp-server",
            Self::Resource => "resource",
            Self::Agent => "agent",
        })
    }
}

/// Labels identifying a managed container.
pub fn managed_labels(topology: &str, name: &str, role: Role) -> Labels {
    Labels::from([
        (LABEL_MANAGED.to_string(), "true".to_string()),
        (LABEL_TOPOLOGY.to_string(), topology.to_string()),
        (role.label_key().to_string(), name.to_string()),
    ])
}

/// Labels identifying a network created for a topology.
pub fn network_labels(topology: &str) -> Labels {
    Labels::from([
        (LABEL_MANAGED.to_string(), "true".to_string()),
        (LABEL_TOPOLOGY.to_string(), topology.to_string()),
    ])
}

/// Deterministic container name: `gridctl-<topology>-<name>`.
pub fn container_name(topology: &str, name: &str) -> String {
    format!("{CONTAINER_PREFIX}-{topology}-{name}")
}

/// Filter matching everything gridctl manages, optionally for one topology.
pub fn ownership_filter(topology: Option<&str>) -> LabelFilter {
    let filter = LabelFilter::new().with(LABEL_MANAGED, "true");
    match topology {
        Some(t) if !t.is_empty() => filter.with(LABEL_TOPOLOGY, t),
        _ => filter,
    }
}

/// Recover `(role, entity name)` from a container's labels.
pub fn workload_identity(labels: &Labels) -> Option<(Role, &str)> {
    [Role::McpServer, Role::Resource, Role::Agent]
        .into_iter()
        .find_map(|role| {
            labels
                .get(role.label_key())
                .map(|name| (role, name.as_str()))
        })
}

/// Topology schema types (networks, MCP servers, resources).
use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Default network driver for both simple and advanced network modes.
pub const DEFAULT_NETWORK_DRIVER: &str = "bridge";

/// Default topology schema version.
pub const DEFAULT_VERSION: &str = "1";

/// Default Dockerfile name for source builds.
pub const DEFAULT_DOCKERFILE: &str = "Dockerfile";

/// Default git ref for git sources.
pub const DEFAULT_GIT_REF: &str = "main";

/// Root topology document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Topology {
    pub version: String,
    pub name: String,
    /// Single network (simple mode).
    pub network: Network,
    /// Explicit network list (advanced mode). When non-empty, `network` is ignored.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<Network>,
    #[serde(rename = "mcp-servers")]
    pub mcp_servers: Vec<McpServerSpec>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<ResourceSpec>,
}

/// A container network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Network {
    pub name: String,
    pub driver: String,
}

/// Wire transport spoken by an MCP server container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    #[default]
    Http,
    Stdio,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http => f.write_str("http"),
            Self::Stdio => f.write_str("stdio"),
        }
    }
}

impl FromStr for Transport {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "http" => Ok(Self::Http),
            "stdio" => Ok(Self::Stdio),
            other => Err(format!("unsupported transport '{other}'")),
        }
    }
}

/// An MCP server container, either pulled from an image or built from source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct McpServerSpec {
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    /// Container port for the `http` transport.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Raw transport string; kept textual so validation can report bad values.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub transport: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub build_args: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub network: String,
}

impl McpServerSpec {
    /// Parsed transport. Empty means `http`; call only after validation for a
    /// guaranteed `Ok`.
    pub fn transport(&self) -> Result<Transport, String> {
        self.transport.parse()
    }

    /// Whether this server is built from source rather than pulled.
    pub fn is_source_based(&self) -> bool {
        self.source.is_some()
    }
}

/// Kind of source an image is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Git,
    Local,
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "git" => Ok(Self::Git),
            "local" => Ok(Self::Local),
            other => Err(format!("unsupported source type '{other}'")),
        }
    }
}

/// How to build an MCP server image from source code.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Source {
    /// `git` or `local`.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(rename = "ref", skip_serializing_if = "String::is_empty")]
    pub git_ref: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub dockerfile: String,
}

impl Source {
    pub fn kind(&self) -> Result<SourceKind, String> {
        self.kind.parse()
    }

    /// The string the build cache is keyed on: URL for git, path for local.
    pub fn cache_key(&self) -> &str {
        match self.kind() {
            Ok(SourceKind::Local) => &self.path,
            _ => &self.url,
        }
    }
}

/// A supporting container (database, cache, etc).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceSpec {
    pub name: String,
    pub image: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub network: String,
}

impl Topology {
    /// Whether the advanced (explicit list) network mode is in use.
    pub fn is_advanced_network_mode(&self) -> bool {
        !self.networks.is_empty()
    }

    /// All networks this topology declares, in declaration order.
    pub fn declared_networks(&self) -> Vec<&Network> {
        if self.is_advanced_network_mode() {
            self.networks.iter().collect()
        } else if self.network.name.is_empty() {
            Vec::new()
        } else {
            vec![&self.network]
        }
    }

    /// Resolve the network an entity joins: its explicit reference, else the
    /// simple-mode network, else the first advanced network.
    pub fn network_for<'a>(&'a self, entity_network: &'a str) -> Option<&'a str> {
        if !entity_network.is_empty() {
            return Some(entity_network);
        }
        self.declared_networks()
            .first()
            .map(|n| n.name.as_str())
    }

    pub fn mcp_server(&self, name: &str) -> Option<&McpServerSpec> {
        self.mcp_servers.iter().find(|s| s.name == name)
    }
}

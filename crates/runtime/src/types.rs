use std::{collections::BTreeMap, fmt, path::PathBuf};

use serde::{Deserialize, Serialize};

pub type Labels = BTreeMap<String, String>;

/// Everything needed to create one container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    /// Overrides the image command when non-empty.
    pub command: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub labels: Labels,
    pub network: Option<String>,
    /// Port publications in engine syntax (`8080`, `5432:5432`, `127.0.0.1::8080`).
    pub publish: Vec<String>,
    pub volumes: Vec<String>,
    /// Keep stdin open so the container can be attached to.
    pub open_stdin: bool,
}

/// Engine-reported container state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
    Unknown,
}

impl ContainerState {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "created" => Self::Created,
            "running" => Self::Running,
            "paused" => Self::Paused,
            "restarting" => Self::Restarting,
            "removing" => Self::Removing,
            "exited" => Self::Exited,
            "dead" => Self::Dead,
            _ => Self::Unknown,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Restarting => "restarting",
            Self::Removing => "removing",
            Self::Exited => "exited",
            Self::Dead => "dead",
            Self::Unknown => "unknown",
        })
    }
}

/// A published port as seen from the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBinding {
    pub container_port: u16,
    pub protocol: String,
    pub host_ip: String,
    pub host_port: u16,
}

/// A container as reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub image: String,
    pub state: ContainerState,
    /// Short human-readable status, e.g. `Up 5 minutes`.
    pub status: String,
    pub labels: Labels,
    pub networks: Vec<String>,
    /// Only populated by `inspect_container`.
    #[serde(default)]
    pub ports: Vec<PortBinding>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkSpec {
    pub name: String,
    pub driver: String,
    pub labels: Labels,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub id: String,
    pub name: String,
    pub driver: String,
    pub labels: Labels,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub id: String,
    /// `repository:tag`.
    pub reference: String,
}

/// Input for building an image from a local build context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSpec {
    pub context: PathBuf,
    /// Dockerfile path, relative to `context` unless absolute.
    pub dockerfile: String,
    pub tag: String,
    pub build_args: BTreeMap<String, String>,
}

impl BuildSpec {
    pub fn dockerfile_path(&self) -> PathBuf {
        let path = PathBuf::from(&self.dockerfile);
        if path.is_absolute() {
            path
        } else {
            self.context.join(path)
        }
    }
}

/// Conjunction of label constraints; `None` values only require the key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelFilter {
    constraints: Vec<(String, Option<String>)>,
}

impl LabelFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.constraints.push((key.into(), Some(value.into())));
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.constraints.push((key.into(), None));
        self
    }

    pub fn constraints(&self) -> &[(String, Option<String>)] {
        &self.constraints
    }

    pub fn matches(&self, labels: &Labels) -> bool {
        self.constraints
            .iter()
            .all(|(k, v)| match (labels.get(k), v) {
                (Some(actual), Some(expected)) => actual == expected,
                (Some(_), None) => true,
                (None, _) => false,
            })
    }

    /// Render as engine CLI filter arguments (`label=k=v`).
    pub fn to_cli_args(&self) -> Vec<String> {
        self.constraints
            .iter()
            .flat_map(|(k, v)| {
                let expr = match v {
                    Some(v) => format!("label={k}={v}"),
                    None => format!("label={k}"),
                };
                ["--filter".to_string(), expr]
            })
            .collect()
    }
}

/// A parsed port publication: `[ip:][host:]container[/proto]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortPublish {
    pub host_ip: Option<String>,
    pub host_port: Option<u16>,
    pub container_port: u16,
    pub protocol: String,
}

impl PortPublish {
    pub fn parse(raw: &str) -> Option<Self> {
        let (ports, protocol) = match raw.rsplit_once('/') {
            Some((p, proto)) => (p, proto.to_string()),
            None => (raw, "tcp".to_string()),
        };
        let parts: Vec<&str> = ports.split(':').collect();
        let (host_ip, host, container) = match parts.as_slice() {
            [c] => (None, "", *c),
            [h, c] => (None, *h, *c),
            [ip, h, c] => (Some((*ip).to_string()), *h, *c),
            _ => return None,
        };
        let host_port = if host.is_empty() {
            None
        } else {
            Some(host.parse().ok()?)
        };
        Some(Self {
            host_ip,
            host_port,
            container_port: container.parse().ok()?,
            protocol,
        })
    }
}

/// Parse the engine's `k=v,k=v` label rendering.
pub fn parse_label_list(raw: &str) -> Labels {
    raw.split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .collect()
}

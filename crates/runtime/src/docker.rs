//! Docker-compatible binding that drives the engine through its CLI.

use std::{collections::BTreeMap, process::Stdio, time::Duration};

use {
    async_trait::async_trait,
    serde::Deserialize,
    tokio::process::Command,
    tracing::{debug, trace},
};

use crate::{
    error::{Result, RuntimeError},
    runtime::{ContainerRuntime, ContainerStream},
    types::{
        BuildSpec, ContainerInfo, ContainerSpec, ContainerState, ImageInfo, LabelFilter,
        NetworkInfo, NetworkSpec, PortBinding, parse_label_list,
    },
};

/// Container runtime backed by the `docker` CLI (or a compatible one such as
/// `podman`).
pub struct DockerRuntime {
    cli: &'static str,
}

impl Default for DockerRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl DockerRuntime {
    pub fn new() -> Self {
        Self { cli: "docker" }
    }

    pub fn with_cli(cli: &'static str) -> Self {
        Self { cli }
    }

    /// Run the CLI and return stdout, mapping failures onto `RuntimeError`.
    async fn run(&self, op: &'static str, entity: &str, args: &[String]) -> Result<String> {
        trace!(cli = self.cli, ?args, "engine command");
        let output = Command::new(self.cli)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| RuntimeError::Io {
                op,
                entity: entity.to_string(),
                source,
            })?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim();
        if is_not_found_error(stderr) {
            return Err(RuntimeError::not_found(op, entity));
        }
        Err(RuntimeError::engine(op, entity, stderr))
    }

    async fn inspect_raw(&self, id: &str) -> Result<Vec<InspectEntry>> {
        let out = self
            .run("inspect container", id, &[
                "container".into(),
                "inspect".into(),
                id.into(),
            ])
            .await?;
        serde_json::from_str(&out)
            .map_err(|e| RuntimeError::engine("inspect container", id, e.to_string()))
    }
}

fn is_not_found_error(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    lower.contains("no such") || lower.contains("not found")
}

fn strs(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| (*s).to_string()).collect()
}

/// Decode `--format '{{json .}}'` output: one JSON object per line.
fn parse_json_lines<T: for<'de> Deserialize<'de>>(
    op: &'static str,
    entity: &str,
    raw: &str,
) -> Result<Vec<T>> {
    raw.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|line| {
            serde_json::from_str(line).map_err(|e| RuntimeError::engine(op, entity, e.to_string()))
        })
        .collect()
}

/// Arguments for `docker create`.
pub(crate) fn create_args(spec: &ContainerSpec) -> Vec<String> {
    let mut args = strs(&["container", "create", "--name"]);
    args.push(spec.name.clone());

    for (k, v) in &spec.labels {
        args.extend(["--label".to_string(), format!("{k}={v}")]);
    }
    for (k, v) in &spec.env {
        args.extend(["-e".to_string(), format!("{k}={v}")]);
    }
    if let Some(network) = &spec.network {
        args.extend(["--network".to_string(), network.clone()]);
    }
    for publish in &spec.publish {
        args.extend(["-p".to_string(), publish.clone()]);
    }
    for volume in &spec.volumes {
        args.extend(["-v".to_string(), volume.clone()]);
    }
    if spec.open_stdin {
        args.push("-i".to_string());
    }

    args.push(spec.image.clone());
    args.extend(spec.command.iter().cloned());
    args
}

/// Arguments for `docker build`.
pub(crate) fn build_args(spec: &BuildSpec) -> Vec<String> {
    let mut args = strs(&["build", "-t"]);
    args.push(spec.tag.clone());
    args.push("-f".to_string());
    args.push(spec.dockerfile_path().display().to_string());
    for (k, v) in &spec.build_args {
        args.extend(["--build-arg".to_string(), format!("{k}={v}")]);
    }
    args.push(spec.context.display().to_string());
    args
}

// ── CLI JSON shapes ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PsEntry {
    #[serde(rename = "ID")]
    id: String,
    names: String,
    image: String,
    state: String,
    status: String,
    #[serde(default)]
    labels: String,
    #[serde(default)]
    networks: String,
}

impl From<PsEntry> for ContainerInfo {
    fn from(e: PsEntry) -> Self {
        Self {
            id: e.id,
            name: e.names.split(',').next().unwrap_or_default().to_string(),
            image: e.image,
            state: ContainerState::parse(&e.state),
            status: e.status,
            labels: parse_label_list(&e.labels),
            networks: e
                .networks
                .split(',')
                .filter(|n| !n.is_empty())
                .map(ToString::to_string)
                .collect(),
            ports: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectEntry {
    id: String,
    name: String,
    config: InspectConfig,
    state: InspectState,
    #[serde(default)]
    network_settings: InspectNetworkSettings,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectConfig {
    image: String,
    #[serde(default)]
    labels: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    status: String,
    #[serde(default)]
    exit_code: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectNetworkSettings {
    #[serde(default)]
    ports: Option<BTreeMap<String, Option<Vec<InspectHostBinding>>>>,
    #[serde(default)]
    networks: Option<BTreeMap<String, serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectHostBinding {
    #[serde(default)]
    host_ip: String,
    host_port: String,
}

impl From<InspectEntry> for ContainerInfo {
    fn from(e: InspectEntry) -> Self {
        let state = ContainerState::parse(&e.state.status);
        let status = match state {
            ContainerState::Exited => format!("Exited ({})", e.state.exit_code),
            ref s => {
                let mut s = s.to_string();
                if let Some(first) = s.get_mut(0..1) {
                    first.make_ascii_uppercase();
                }
                s
            },
        };

        let mut ports = Vec::new();
        for (key, bindings) in e.network_settings.ports.unwrap_or_default() {
            let (port, protocol) = key.split_once('/').unwrap_or((key.as_str(), "tcp"));
            let Ok(container_port) = port.parse::<u16>() else {
                continue;
            };
            for b in bindings.unwrap_or_default() {
                if let Ok(host_port) = b.host_port.parse::<u16>() {
                    ports.push(PortBinding {
                        container_port,
                        protocol: protocol.to_string(),
                        host_ip: b.host_ip,
                        host_port,
                    });
                }
            }
        }

        Self {
            id: e.id,
            name: e.name.trim_start_matches('/').to_string(),
            image: e.config.image,
            state,
            status,
            labels: e.config.labels.unwrap_or_default(),
            networks: e
                .network_settings
                .networks
                .unwrap_or_default()
                .into_keys()
                .collect(),
            ports,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NetworkLsEntry {
    #[serde(rename = "ID")]
    id: String,
    name: String,
    driver: String,
    #[serde(default)]
    labels: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ImageLsEntry {
    #[serde(rename = "ID")]
    id: String,
    repository: String,
    tag: String,
}

// ── Binding ──────────────────────────────────────────────────────────────────

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    fn backend_name(&self) -> &'static str {
        self.cli
    }

    async fn ping(&self) -> Result<()> {
        let output = Command::new(self.cli)
            .args(["version", "--format", "{{.Server.Version}}"])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| RuntimeError::Unavailable(format!("{} CLI not usable: {e}", self.cli)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RuntimeError::Unavailable(stderr.trim().to_string()));
        }
        debug!(
            backend = self.cli,
            version = %String::from_utf8_lossy(&output.stdout).trim(),
            "container engine reachable"
        );
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let out = self
            .run("create container", &spec.name, &create_args(spec))
            .await?;
        Ok(out.trim().to_string())
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.run("start container", id, &strs(&["container", "start", id]))
            .await
            .map(drop)
    }

    async fn stop_container(&self, id: &str, timeout: Duration) -> Result<()> {
        let secs = timeout.as_secs().to_string();
        self.run(
            "stop container",
            id,
            &strs(&["container", "stop", "-t", &secs, id]),
        )
        .await
        .map(drop)
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        self.run(
            "remove container",
            id,
            &strs(&["container", "rm", "-f", id]),
        )
        .await
        .map(drop)
    }

    async fn list_containers(&self, filter: &LabelFilter) -> Result<Vec<ContainerInfo>> {
        let mut args = strs(&["container", "ls", "-a", "--no-trunc"]);
        args.extend(filter.to_cli_args());
        args.extend(strs(&["--format", "{{json .}}"]));
        let out = self.run("list containers", "", &args).await?;
        let entries: Vec<PsEntry> = parse_json_lines("list containers", "", &out)?;
        Ok(entries.into_iter().map(ContainerInfo::from).collect())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerInfo> {
        self.inspect_raw(id)
            .await?
            .into_iter()
            .next()
            .map(ContainerInfo::from)
            .ok_or_else(|| RuntimeError::not_found("inspect container", id))
    }

    async fn attach(&self, id: &str) -> Result<ContainerStream> {
        let mut child = Command::new(self.cli)
            .args(["attach", "--sig-proxy=false", id])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RuntimeError::Io {
                op: "attach container",
                entity: id.to_string(),
                source,
            })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(RuntimeError::engine(
                "attach container",
                id,
                "failed to capture attach stdio",
            ));
        };
        debug!(container = id, "attached to container stdio");
        Ok(ContainerStream::new(stdout, stdin).with_process(child))
    }

    async fn list_networks(&self, filter: &LabelFilter) -> Result<Vec<NetworkInfo>> {
        let mut args = strs(&["network", "ls", "--no-trunc"]);
        args.extend(filter.to_cli_args());
        args.extend(strs(&["--format", "{{json .}}"]));
        let out = self.run("list networks", "", &args).await?;
        let entries: Vec<NetworkLsEntry> = parse_json_lines("list networks", "", &out)?;
        Ok(entries
            .into_iter()
            .map(|e| NetworkInfo {
                id: e.id,
                name: e.name,
                driver: e.driver,
                labels: parse_label_list(&e.labels),
            })
            .collect())
    }

    async fn create_network(&self, spec: &NetworkSpec) -> Result<String> {
        let mut args = strs(&["network", "create", "--driver", &spec.driver]);
        for (k, v) in &spec.labels {
            args.extend(["--label".to_string(), format!("{k}={v}")]);
        }
        args.push(spec.name.clone());
        let out = self.run("create network", &spec.name, &args).await?;
        Ok(out.trim().to_string())
    }

    async fn remove_network(&self, id: &str) -> Result<()> {
        self.run("remove network", id, &strs(&["network", "rm", id]))
            .await
            .map(drop)
    }

    async fn list_images(&self) -> Result<Vec<ImageInfo>> {
        let out = self
            .run("list images", "", &strs(&[
                "image",
                "ls",
                "--format",
                "{{json .}}",
            ]))
            .await?;
        let entries: Vec<ImageLsEntry> = parse_json_lines("list images", "", &out)?;
        Ok(entries
            .into_iter()
            .map(|e| ImageInfo {
                id: e.id,
                reference: format!("{}:{}", e.repository, e.tag),
            })
            .collect())
    }

    async fn image_exists(&self, reference: &str) -> Result<bool> {
        match self
            .run("inspect image", reference, &strs(&[
                "image", "inspect", "--format", "{{.Id}}", reference,
            ]))
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn pull_image(&self, reference: &str) -> Result<()> {
        self.run("pull image", reference, &strs(&["image", "pull", reference]))
            .await
            .map(drop)
    }

    async fn build_image(&self, spec: &BuildSpec) -> Result<()> {
        self.run("build image", &spec.tag, &build_args(spec))
            .await
            .map(drop)
    }
}

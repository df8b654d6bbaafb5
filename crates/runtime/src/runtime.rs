use std::{sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    tokio::io::{AsyncRead, AsyncWrite},
};

use crate::{
    docker::DockerRuntime,
    error::{Result, RuntimeError},
    types::{
        BuildSpec, ContainerInfo, ContainerSpec, ImageInfo, LabelFilter, NetworkInfo, NetworkSpec,
    },
};

/// Capability interface over one container engine.
///
/// Entities are addressed by id or name; bindings report a missing entity as
/// [`RuntimeError::NotFound`] so callers can treat "already absent" as success.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Human-readable backend name (e.g. "docker", "podman", "memory").
    fn backend_name(&self) -> &'static str;

    /// Engine health check.
    async fn ping(&self) -> Result<()>;

    // ---- containers ----
    /// Create a container and return its id. Does not start it.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String>;
    async fn start_container(&self, id: &str) -> Result<()>;
    async fn stop_container(&self, id: &str, timeout: Duration) -> Result<()>;
    async fn remove_container(&self, id: &str) -> Result<()>;
    /// List containers (running or not) whose labels match `filter`.
    async fn list_containers(&self, filter: &LabelFilter) -> Result<Vec<ContainerInfo>>;
    async fn inspect_container(&self, id: &str) -> Result<ContainerInfo>;
    /// Open the container's stdio as a bidirectional byte stream.
    async fn attach(&self, id: &str) -> Result<ContainerStream>;

    // ---- networks ----
    async fn list_networks(&self, filter: &LabelFilter) -> Result<Vec<NetworkInfo>>;
    async fn create_network(&self, spec: &NetworkSpec) -> Result<String>;
    async fn remove_network(&self, id: &str) -> Result<()>;

    // ---- images ----
    async fn list_images(&self) -> Result<Vec<ImageInfo>>;
    async fn pull_image(&self, reference: &str) -> Result<()>;
    async fn build_image(&self, spec: &BuildSpec) -> Result<()>;

    /// Whether an image is present locally.
    async fn image_exists(&self, reference: &str) -> Result<bool> {
        let wanted = normalize_reference(reference);
        Ok(self
            .list_images()
            .await?
            .iter()
            .any(|img| normalize_reference(&img.reference) == wanted))
    }

    /// Host port the engine mapped for a container's declared port.
    async fn host_port(&self, id: &str, container_port: u16) -> Result<u16> {
        let info = self.inspect_container(id).await?;
        info.ports
            .iter()
            .find(|p| p.container_port == container_port && p.host_port != 0)
            .map(|p| p.host_port)
            .ok_or_else(|| {
                RuntimeError::engine(
                    "host port",
                    id,
                    format!("container port {container_port} is not published"),
                )
            })
    }
}

/// Append `:latest` to untagged references.
pub fn normalize_reference(reference: &str) -> String {
    let last_segment = reference.rsplit('/').next().unwrap_or(reference);
    if last_segment.contains(':') || last_segment.contains('@') {
        reference.to_string()
    } else {
        format!("{reference}:latest")
    }
}

/// An attached container stdio stream.
///
/// Dropping it detaches (and, for process-backed bindings, kills the helper
/// process).
pub struct ContainerStream {
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    pub writer: Box<dyn AsyncWrite + Send + Unpin>,
    process: Option<tokio::process::Child>,
}

impl ContainerStream {
    pub fn new(
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            process: None,
        }
    }

    /// Tie the stream's lifetime to a helper process.
    pub fn with_process(mut self, child: tokio::process::Child) -> Self {
        self.process = Some(child);
        self
    }

    /// Split into halves plus the process guard (keep the guard alive).
    pub fn into_parts(
        self,
    ) -> (
        Box<dyn AsyncRead + Send + Unpin>,
        Box<dyn AsyncWrite + Send + Unpin>,
        Option<tokio::process::Child>,
    ) {
        (self.reader, self.writer, self.process)
    }
}

/// Backends selectable by name.
pub const BACKENDS: &[&str] = &["docker", "podman"];

/// Select the runtime binding once, at process entry.
pub fn select_runtime(backend: &str) -> Result<Arc<dyn ContainerRuntime>> {
    match backend {
        "docker" => Ok(Arc::new(DockerRuntime::new())),
        "podman" => Ok(Arc::new(DockerRuntime::with_cli("podman"))),
        other => Err(RuntimeError::UnknownBackend(other.to_string())),
    }
}

//! In-memory container runtime for tests and dry runs.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use {
    async_trait::async_trait,
    tokio::io::{DuplexStream, duplex},
};

use crate::{
    error::{Result, RuntimeError},
    runtime::{ContainerRuntime, ContainerStream, normalize_reference},
    types::{
        BuildSpec, ContainerInfo, ContainerSpec, ContainerState, ImageInfo, LabelFilter,
        NetworkInfo, NetworkSpec, PortBinding, PortPublish,
    },
};

const FIRST_EPHEMERAL_PORT: u16 = 49152;
const ATTACH_BUFFER: usize = 64 * 1024;

#[derive(Default)]
struct Inner {
    unreachable: bool,
    next_id: u64,
    next_host_port: u16,
    containers: BTreeMap<String, StoredContainer>,
    networks: BTreeMap<String, NetworkInfo>,
    images: BTreeSet<String>,
    fail_create: BTreeSet<String>,
    fail_pull: BTreeSet<String>,
    attached: HashMap<String, DuplexStream>,
    pulls: Vec<String>,
    builds: Vec<BuildSpec>,
    creates: usize,
}

struct StoredContainer {
    info: ContainerInfo,
    spec: ContainerSpec,
}

impl Inner {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}{:012x}", self.next_id)
    }

    fn container_key(&self, id_or_name: &str) -> Option<String> {
        if self.containers.contains_key(id_or_name) {
            return Some(id_or_name.to_string());
        }
        self.containers
            .iter()
            .find(|(_, c)| c.info.name == id_or_name)
            .map(|(id, _)| id.clone())
    }

    fn network_key(&self, id_or_name: &str) -> Option<String> {
        if self.networks.contains_key(id_or_name) {
            return Some(id_or_name.to_string());
        }
        self.networks
            .iter()
            .find(|(_, n)| n.name == id_or_name)
            .map(|(id, _)| id.clone())
    }

    fn allocate_port(&mut self) -> u16 {
        if self.next_host_port == 0 {
            self.next_host_port = FIRST_EPHEMERAL_PORT;
        }
        let port = self.next_host_port;
        self.next_host_port = self.next_host_port.wrapping_add(1);
        port
    }
}

/// A [`ContainerRuntime`] that keeps every entity in process memory.
///
/// Mirrors engine semantics closely enough for orchestration logic: names are
/// unique, missing entities are `NotFound`, published ports get host ports
/// from the ephemeral range.
#[derive(Default)]
pub struct MemoryRuntime {
    inner: Mutex<Inner>,
}

impl MemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Simulate the engine going away (or coming back).
    pub fn set_reachable(&self, reachable: bool) {
        self.lock().unreachable = !reachable;
    }

    /// Make an image present locally.
    pub fn add_image(&self, reference: &str) {
        self.lock().images.insert(normalize_reference(reference));
    }

    /// Make `create_container` fail for the given container name.
    pub fn fail_on_create(&self, container_name: &str) {
        self.lock().fail_create.insert(container_name.to_string());
    }

    /// Make `pull_image` fail for the given reference.
    pub fn fail_on_pull(&self, reference: &str) {
        self.lock().fail_pull.insert(normalize_reference(reference));
    }

    /// Names of all containers, sorted.
    pub fn container_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .lock()
            .containers
            .values()
            .map(|c| c.info.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Names of all networks, sorted.
    pub fn network_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().networks.values().map(|n| n.name.clone()).collect();
        names.sort();
        names
    }

    /// The create request a container was built from.
    pub fn container_spec(&self, id_or_name: &str) -> Option<ContainerSpec> {
        let inner = self.lock();
        let key = inner.container_key(id_or_name)?;
        inner.containers.get(&key).map(|c| c.spec.clone())
    }

    /// Force a container into a state (e.g. to simulate a crash).
    pub fn set_state(&self, id_or_name: &str, state: ContainerState) {
        let mut inner = self.lock();
        if let Some(key) = inner.container_key(id_or_name)
            && let Some(c) = inner.containers.get_mut(&key)
        {
            c.info.status = status_for(&state);
            c.info.state = state;
        }
    }

    /// Register a container gridctl does not manage, attached to `network`.
    pub fn add_foreign_container(&self, name: &str, network: &str) {
        let mut inner = self.lock();
        let id = inner.next_id("c");
        inner.containers.insert(id.clone(), StoredContainer {
            info: ContainerInfo {
                id,
                name: name.to_string(),
                image: "busybox:latest".into(),
                state: ContainerState::Running,
                status: status_for(&ContainerState::Running),
                labels: Default::default(),
                networks: vec![network.to_string()],
                ports: Vec::new(),
            },
            spec: ContainerSpec::default(),
        });
    }

    /// Take the container side of the latest `attach` to a container.
    pub fn take_attached(&self, id_or_name: &str) -> Option<DuplexStream> {
        let mut inner = self.lock();
        let key = inner.container_key(id_or_name)?;
        inner.attached.remove(&key)
    }

    pub fn pulls(&self) -> Vec<String> {
        self.lock().pulls.clone()
    }

    pub fn builds(&self) -> Vec<BuildSpec> {
        self.lock().builds.clone()
    }

    pub fn create_count(&self) -> usize {
        self.lock().creates
    }

    fn check_reachable(&self) -> Result<()> {
        if self.lock().unreachable {
            return Err(RuntimeError::Unavailable("memory engine is offline".into()));
        }
        Ok(())
    }
}

fn status_for(state: &ContainerState) -> String {
    match state {
        ContainerState::Running => "Up".into(),
        ContainerState::Exited => "Exited (0)".into(),
        ContainerState::Created => "Created".into(),
        other => other.to_string(),
    }
}

#[async_trait]
impl ContainerRuntime for MemoryRuntime {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<()> {
        self.check_reachable()
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        self.check_reachable()?;
        let mut inner = self.lock();
        if inner.fail_create.contains(&spec.name) {
            return Err(RuntimeError::engine(
                "create container",
                &spec.name,
                "simulated create failure",
            ));
        }
        if inner.container_key(&spec.name).is_some() {
            return Err(RuntimeError::engine(
                "create container",
                &spec.name,
                "container name already in use",
            ));
        }
        if !inner.images.contains(&normalize_reference(&spec.image)) {
            return Err(RuntimeError::not_found("create container", &spec.image));
        }
        if let Some(network) = &spec.network
            && inner.network_key(network).is_none()
        {
            return Err(RuntimeError::not_found("create container", network));
        }

        let mut ports = Vec::new();
        for raw in &spec.publish {
            let Some(p) = PortPublish::parse(raw) else {
                return Err(RuntimeError::engine(
                    "create container",
                    &spec.name,
                    format!("invalid port publication '{raw}'"),
                ));
            };
            let host_port = match p.host_port {
                Some(port) => port,
                None => inner.allocate_port(),
            };
            ports.push(PortBinding {
                container_port: p.container_port,
                protocol: p.protocol,
                host_ip: p.host_ip.unwrap_or_else(|| "0.0.0.0".into()),
                host_port,
            });
        }

        let id = inner.next_id("c");
        inner.creates += 1;
        inner.containers.insert(id.clone(), StoredContainer {
            info: ContainerInfo {
                id: id.clone(),
                name: spec.name.clone(),
                image: spec.image.clone(),
                state: ContainerState::Created,
                status: status_for(&ContainerState::Created),
                labels: spec.labels.clone(),
                networks: spec.network.iter().cloned().collect(),
                ports,
            },
            spec: spec.clone(),
        });
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.check_reachable()?;
        let mut inner = self.lock();
        let key = inner
            .container_key(id)
            .ok_or_else(|| RuntimeError::not_found("start container", id))?;
        if let Some(c) = inner.containers.get_mut(&key) {
            c.info.state = ContainerState::Running;
            c.info.status = status_for(&ContainerState::Running);
        }
        Ok(())
    }

    async fn stop_container(&self, id: &str, _timeout: Duration) -> Result<()> {
        self.check_reachable()?;
        let mut inner = self.lock();
        let key = inner
            .container_key(id)
            .ok_or_else(|| RuntimeError::not_found("stop container", id))?;
        if let Some(c) = inner.containers.get_mut(&key) {
            c.info.state = ContainerState::Exited;
            c.info.status = status_for(&ContainerState::Exited);
        }
        inner.attached.remove(&key);
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        self.check_reachable()?;
        let mut inner = self.lock();
        let key = inner
            .container_key(id)
            .ok_or_else(|| RuntimeError::not_found("remove container", id))?;
        inner.containers.remove(&key);
        inner.attached.remove(&key);
        Ok(())
    }

    async fn list_containers(&self, filter: &LabelFilter) -> Result<Vec<ContainerInfo>> {
        self.check_reachable()?;
        Ok(self
            .lock()
            .containers
            .values()
            .filter(|c| filter.matches(&c.info.labels))
            .map(|c| c.info.clone())
            .collect())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerInfo> {
        self.check_reachable()?;
        let inner = self.lock();
        inner
            .container_key(id)
            .and_then(|key| inner.containers.get(&key))
            .map(|c| c.info.clone())
            .ok_or_else(|| RuntimeError::not_found("inspect container", id))
    }

    async fn attach(&self, id: &str) -> Result<ContainerStream> {
        self.check_reachable()?;
        let mut inner = self.lock();
        let key = inner
            .container_key(id)
            .ok_or_else(|| RuntimeError::not_found("attach container", id))?;
        let running = inner
            .containers
            .get(&key)
            .is_some_and(|c| c.info.state.is_running());
        if !running {
            return Err(RuntimeError::engine(
                "attach container",
                id,
                "container is not running",
            ));
        }
        let (ours, theirs) = duplex(ATTACH_BUFFER);
        inner.attached.insert(key, theirs);
        let (reader, writer) = tokio::io::split(ours);
        Ok(ContainerStream::new(reader, writer))
    }

    async fn list_networks(&self, filter: &LabelFilter) -> Result<Vec<NetworkInfo>> {
        self.check_reachable()?;
        Ok(self
            .lock()
            .networks
            .values()
            .filter(|n| filter.matches(&n.labels))
            .cloned()
            .collect())
    }

    async fn create_network(&self, spec: &NetworkSpec) -> Result<String> {
        self.check_reachable()?;
        let mut inner = self.lock();
        if inner.network_key(&spec.name).is_some() {
            return Err(RuntimeError::engine(
                "create network",
                &spec.name,
                "network already exists",
            ));
        }
        let id = inner.next_id("n");
        inner.networks.insert(id.clone(), NetworkInfo {
            id: id.clone(),
            name: spec.name.clone(),
            driver: spec.driver.clone(),
            labels: spec.labels.clone(),
        });
        Ok(id)
    }

    async fn remove_network(&self, id: &str) -> Result<()> {
        self.check_reachable()?;
        let mut inner = self.lock();
        let key = inner
            .network_key(id)
            .ok_or_else(|| RuntimeError::not_found("remove network", id))?;
        inner.networks.remove(&key);
        Ok(())
    }

    async fn list_images(&self) -> Result<Vec<ImageInfo>> {
        self.check_reachable()?;
        Ok(self
            .lock()
            .images
            .iter()
            .map(|reference| ImageInfo {
                id: format!("sha256:{reference}"),
                reference: reference.clone(),
            })
            .collect())
    }

    async fn pull_image(&self, reference: &str) -> Result<()> {
        self.check_reachable()?;
        let mut inner = self.lock();
        let normalized = normalize_reference(reference);
        inner.pulls.push(reference.to_string());
        if inner.fail_pull.contains(&normalized) {
            return Err(RuntimeError::engine(
                "pull image",
                reference,
                "manifest unknown",
            ));
        }
        inner.images.insert(normalized);
        Ok(())
    }

    async fn build_image(&self, spec: &BuildSpec) -> Result<()> {
        self.check_reachable()?;
        let mut inner = self.lock();
        inner.builds.push(spec.clone());
        inner.images.insert(normalize_reference(&spec.tag));
        Ok(())
    }
}

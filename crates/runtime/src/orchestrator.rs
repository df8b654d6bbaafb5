//! Reconciles a [`Topology`] against a [`ContainerRuntime`].

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use {
    futures::future::join_all,
    gridctl_config::{McpServerSpec, ResourceSpec, Topology, Transport},
    serde::Serialize,
    thiserror::Error,
    tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard},
    tracing::{debug, info, warn},
};

use crate::{
    builder::{GitSourceBuilder, SourceBuilder},
    error::RuntimeError,
    labels::{
        LABEL_TOPOLOGY, Role, container_name, managed_labels, network_labels, ownership_filter,
        workload_identity,
    },
    runtime::ContainerRuntime,
    types::{ContainerInfo, ContainerSpec, ContainerState, LabelFilter, NetworkSpec},
};

/// Grace period given to containers before they are killed on `down`.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// A single entity that could not be provisioned or torn down.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityFailure {
    pub entity: String,
    pub role: Role,
    pub error: String,
}

impl fmt::Display for EntityFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}': {}", self.role, self.entity, self.error)
    }
}

fn join_failures(failures: &[EntityFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("cannot reach container engine: {0}")]
    EngineUnavailable(String),

    #[error("{} of the topology's workloads failed to provision: {}", .failures.len(), join_failures(.failures))]
    PartialProvision {
        failures: Vec<EntityFailure>,
        /// What did succeed; left running.
        report: UpReport,
    },

    #[error("{} containers could not be removed: {}", .failures.len(), join_failures(.failures))]
    PartialTeardown {
        failures: Vec<EntityFailure>,
        report: DownReport,
    },

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// Outcome of a successful (or partially successful) `up`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpReport {
    pub networks_created: Vec<String>,
    /// Containers created and started by this call.
    pub created: Vec<String>,
    /// Containers that existed but were stopped, and were started again.
    pub started: Vec<String>,
    /// Containers that were already running.
    pub present: Vec<String>,
}

/// Outcome of `down`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DownReport {
    pub containers_removed: Vec<String>,
    pub networks_removed: Vec<String>,
    /// Owned networks left in place because other containers still use them.
    pub networks_kept: Vec<String>,
}

/// One managed container, as reported by `status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkloadStatus {
    pub id: String,
    pub container: String,
    pub topology: String,
    pub name: String,
    pub role: Option<Role>,
    pub image: String,
    pub state: ContainerState,
    pub status: String,
}

impl From<ContainerInfo> for WorkloadStatus {
    fn from(info: ContainerInfo) -> Self {
        let (role, name) = match workload_identity(&info.labels) {
            Some((role, name)) => (Some(role), name.to_string()),
            None => (None, info.name.clone()),
        };
        Self {
            topology: info
                .labels
                .get(LABEL_TOPOLOGY)
                .cloned()
                .unwrap_or_default(),
            id: info.id,
            container: info.name,
            name,
            role,
            image: info.image,
            state: info.state,
            status: info.status,
        }
    }
}

enum Provisioned {
    Created,
    Started,
    Present,
}

/// What `up` should realize for one entity.
struct Workload<'a> {
    name: &'a str,
    role: Role,
    container: ContainerSpec,
    /// Server to build before creating, when source-based.
    build: Option<&'a McpServerSpec>,
}

pub struct Orchestrator {
    runtime: Arc<dyn ContainerRuntime>,
    builder: Arc<dyn SourceBuilder>,
    stop_timeout: Duration,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl Orchestrator {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self::with_builder(runtime, Arc::new(GitSourceBuilder::new()))
    }

    pub fn with_builder(runtime: Arc<dyn ContainerRuntime>, builder: Arc<dyn SourceBuilder>) -> Self {
        Self {
            runtime,
            builder,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    async fn lock_topology(&self, topology: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(topology.to_string()).or_default())
        };
        lock.lock_owned().await
    }

    async fn ping(&self) -> Result<(), OrchestratorError> {
        self.runtime.ping().await.map_err(|e| match e {
            RuntimeError::Unavailable(msg) => OrchestratorError::EngineUnavailable(msg),
            other => OrchestratorError::EngineUnavailable(other.to_string()),
        })
    }

    /// Bring every network and container the topology declares into existence.
    pub async fn up(&self, topology: &Topology) -> Result<UpReport, OrchestratorError> {
        let _guard = self.lock_topology(&topology.name).await;
        self.ping().await?;

        let mut report = UpReport {
            networks_created: self.ensure_networks(topology).await?,
            ..Default::default()
        };

        let existing: BTreeMap<String, ContainerInfo> = self
            .runtime
            .list_containers(&ownership_filter(Some(&topology.name)))
            .await?
            .into_iter()
            .map(|c| (c.name.clone(), c))
            .collect();

        let workloads = plan(topology);
        let results = join_all(
            workloads
                .iter()
                .map(|w| self.provision(&topology.name, w, existing.get(&w.container.name))),
        )
        .await;

        let mut failures = Vec::new();
        for (workload, result) in workloads.iter().zip(results) {
            let container = workload.container.name.clone();
            match result {
                Ok(Provisioned::Created) => report.created.push(container),
                Ok(Provisioned::Started) => report.started.push(container),
                Ok(Provisioned::Present) => report.present.push(container),
                Err(error) => {
                    warn!(
                        topology = %topology.name,
                        entity = workload.name,
                        role = %workload.role,
                        error = %error,
                        "failed to provision workload"
                    );
                    failures.push(EntityFailure {
                        entity: workload.name.to_string(),
                        role: workload.role,
                        error: format!("{error:#}"),
                    });
                },
            }
        }

        info!(
            topology = %topology.name,
            created = report.created.len(),
            started = report.started.len(),
            present = report.present.len(),
            failed = failures.len(),
            "topology up"
        );

        if failures.is_empty() {
            Ok(report)
        } else {
            Err(OrchestratorError::PartialProvision { failures, report })
        }
    }

    async fn ensure_networks(&self, topology: &Topology) -> Result<Vec<String>, OrchestratorError> {
        let existing: Vec<String> = self
            .runtime
            .list_networks(&LabelFilter::new())
            .await?
            .into_iter()
            .map(|n| n.name)
            .collect();

        let mut created = Vec::new();
        for network in topology.declared_networks() {
            if existing.contains(&network.name) {
                debug!(network = %network.name, "network already exists");
                continue;
            }
            self.runtime
                .create_network(&NetworkSpec {
                    name: network.name.clone(),
                    driver: network.driver.clone(),
                    labels: network_labels(&topology.name),
                })
                .await?;
            info!(topology = %topology.name, network = %network.name, driver = %network.driver, "created network");
            created.push(network.name.clone());
        }
        Ok(created)
    }

    async fn provision(
        &self,
        topology: &str,
        workload: &Workload<'_>,
        existing: Option<&ContainerInfo>,
    ) -> anyhow::Result<Provisioned> {
        if let Some(info) = existing {
            if info.state.is_running() {
                debug!(container = %info.name, "container already running");
                return Ok(Provisioned::Present);
            }
            self.runtime.start_container(&info.id).await?;
            info!(container = %info.name, "started existing container");
            return Ok(Provisioned::Started);
        }

        let mut spec = workload.container.clone();
        match workload.build {
            Some(server) => {
                spec.image = self
                    .builder
                    .build(self.runtime.as_ref(), topology, server)
                    .await?;
            },
            None => {
                if !self.runtime.image_exists(&spec.image).await? {
                    info!(image = %spec.image, "pulling image");
                    self.runtime.pull_image(&spec.image).await?;
                }
            },
        }

        let id = self.runtime.create_container(&spec).await?;
        self.runtime.start_container(&id).await?;
        info!(container = %spec.name, image = %spec.image, role = %workload.role, "created container");
        Ok(Provisioned::Created)
    }

    /// Stop and remove everything the topology owns.
    pub async fn down(&self, topology: &str) -> Result<DownReport, OrchestratorError> {
        let _guard = self.lock_topology(topology).await;
        self.ping().await?;

        let mut report = DownReport::default();
        let mut failures = Vec::new();

        let owned = self
            .runtime
            .list_containers(&ownership_filter(Some(topology)))
            .await?;
        for container in owned {
            match self.remove_container(&container).await {
                Ok(()) => {
                    info!(topology, container = %container.name, "removed container");
                    report.containers_removed.push(container.name);
                },
                Err(e) => {
                    let (role, entity) = workload_identity(&container.labels)
                        .map(|(r, n)| (r, n.to_string()))
                        .unwrap_or((Role::Resource, container.name.clone()));
                    failures.push(EntityFailure {
                        entity,
                        role,
                        error: e.to_string(),
                    });
                },
            }
        }

        let networks = self
            .runtime
            .list_networks(&ownership_filter(Some(topology)))
            .await?;
        if !networks.is_empty() {
            let remaining = self.runtime.list_containers(&LabelFilter::new()).await?;
            for network in networks {
                if remaining.iter().any(|c| c.networks.contains(&network.name)) {
                    info!(topology, network = %network.name, "network still in use, keeping it");
                    report.networks_kept.push(network.name);
                    continue;
                }
                match self.runtime.remove_network(&network.id).await {
                    Ok(()) => {
                        info!(topology, network = %network.name, "removed network");
                        report.networks_removed.push(network.name);
                    },
                    Err(e) if e.is_not_found() => {},
                    Err(e) => return Err(e.into()),
                }
            }
        }

        if failures.is_empty() {
            Ok(report)
        } else {
            Err(OrchestratorError::PartialTeardown { failures, report })
        }
    }

    async fn remove_container(&self, container: &ContainerInfo) -> Result<(), RuntimeError> {
        if container.state.is_running() {
            ignore_not_found(
                self.runtime
                    .stop_container(&container.id, self.stop_timeout)
                    .await,
            )?;
        }
        ignore_not_found(self.runtime.remove_container(&container.id).await)
    }

    /// Report managed containers, optionally for one topology.
    pub async fn status(&self, topology: Option<&str>) -> Result<Vec<WorkloadStatus>, OrchestratorError> {
        let mut workloads: Vec<WorkloadStatus> = self
            .runtime
            .list_containers(&ownership_filter(topology))
            .await?
            .into_iter()
            .map(WorkloadStatus::from)
            .collect();
        workloads.sort_by(|a, b| (&a.topology, &a.container).cmp(&(&b.topology, &b.container)));
        Ok(workloads)
    }
}

fn ignore_not_found(result: Result<(), RuntimeError>) -> Result<(), RuntimeError> {
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}

/// Translate a topology into per-entity container specs.
fn plan(topology: &Topology) -> Vec<Workload<'_>> {
    let mut workloads: Vec<Workload<'_>> = topology
        .resources
        .iter()
        .map(|r| resource_workload(topology, r))
        .collect();
    workloads.extend(
        topology
            .mcp_servers
            .iter()
            .map(|s| server_workload(topology, s)),
    );
    workloads
}

fn server_workload<'a>(topology: &'a Topology, server: &'a McpServerSpec) -> Workload<'a> {
    let mut container = ContainerSpec {
        name: container_name(&topology.name, &server.name),
        image: server.image.clone(),
        command: server.command.clone(),
        env: server.env.clone(),
        labels: managed_labels(&topology.name, &server.name, Role::McpServer),
        network: topology.network_for(&server.network).map(str::to_string),
        ..Default::default()
    };
    match server.transport() {
        Ok(Transport::Stdio) => container.open_stdin = true,
        _ => {
            if let Some(port) = server.port {
                container.publish.push(format!("127.0.0.1::{port}"));
            }
        },
    }
    Workload {
        name: &server.name,
        role: Role::McpServer,
        container,
        build: server.is_source_based().then_some(server),
    }
}

fn resource_workload<'a>(topology: &'a Topology, resource: &'a ResourceSpec) -> Workload<'a> {
    Workload {
        name: &resource.name,
        role: Role::Resource,
        container: ContainerSpec {
            name: container_name(&topology.name, &resource.name),
            image: resource.image.clone(),
            env: resource.env.clone(),
            labels: managed_labels(&topology.name, &resource.name, Role::Resource),
            network: topology.network_for(&resource.network).map(str::to_string),
            publish: resource.ports.clone(),
            volumes: resource.volumes.clone(),
            ..Default::default()
        },
        build: None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {
        super::*,
        crate::memory::MemoryRuntime,
        async_trait::async_trait,
        gridctl_config::{Network, Source},
        std::sync::atomic::{AtomicUsize, Ordering},
    };

    /// Builder fake that tags images without touching git.
    #[derive(Default)]
    struct CountingBuilder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SourceBuilder for CountingBuilder {
        async fn build(
            &self,
            runtime: &dyn ContainerRuntime,
            topology: &str,
            server: &McpServerSpec,
        ) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let tag = crate::builder::image_tag_for(topology, &server.name);
            runtime
                .build_image(&crate::types::BuildSpec {
                    context: "/tmp/src".into(),
                    dockerfile: "Dockerfile".into(),
                    tag: tag.clone(),
                    build_args: Default::default(),
                })
                .await?;
            Ok(tag)
        }
    }

    fn demo_topology() -> Topology {
        Topology {
            version: "1".into(),
            name: "demo".into(),
            network: Network {
                name: "demo-net".into(),
                driver: "bridge".into(),
            },
            mcp_servers: vec![
                McpServerSpec {
                    name: "search".into(),
                    image: "ghcr.io/acme/search:latest".into(),
                    port: Some(8080),
                    ..Default::default()
                },
                McpServerSpec {
                    name: "fetch".into(),
                    port: Some(3000),
                    source: Some(Source {
                        kind: "git".into(),
                        url: "https://github.com/acme/fetch.git".into(),
                        git_ref: "main".into(),
                        dockerfile: "Dockerfile".into(),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            ],
            ..Default::default()
        }
    }

    fn setup() -> (Arc<MemoryRuntime>, Arc<CountingBuilder>, Orchestrator) {
        let runtime = Arc::new(MemoryRuntime::new());
        let builder = Arc::new(CountingBuilder::default());
        let orch = Orchestrator::with_builder(runtime.clone(), builder.clone());
        (runtime, builder, orch)
    }

    #[tokio::test]
    async fn demo_scenario_up_status_down() {
        let (runtime, builder, orch) = setup();
        let topo = demo_topology();

        let report = orch.up(&topo).await.unwrap();
        assert_eq!(report.networks_created, vec!["demo-net"]);
        assert_eq!(report.created.len(), 2);
        assert_eq!(builder.calls.load(Ordering::SeqCst), 1);
        assert_eq!(runtime.container_names(), vec![
            "gridctl-demo-fetch",
            "gridctl-demo-search"
        ]);

        let search = runtime.container_spec("gridctl-demo-search").unwrap();
        assert_eq!(search.network.as_deref(), Some("demo-net"));
        assert_eq!(search.publish, vec!["127.0.0.1::8080"]);
        let fetch = runtime.container_spec("gridctl-demo-fetch").unwrap();
        assert_eq!(fetch.image, "gridctl-demo-fetch:latest");

        let status = orch.status(Some("demo")).await.unwrap();
        assert_eq!(status.len(), 2);
        assert!(status.iter().all(|s| s.state.is_running()));
        assert!(status.iter().all(|s| s.role == Some(Role::McpServer)));

        let down = orch.down("demo").await.unwrap();
        assert_eq!(down.containers_removed.len(), 2);
        assert_eq!(down.networks_removed, vec!["demo-net"]);
        assert!(runtime.container_names().is_empty());
        assert!(runtime.network_names().is_empty());
    }

    #[tokio::test]
    async fn up_is_idempotent() {
        let (runtime, _, orch) = setup();
        let topo = demo_topology();

        orch.up(&topo).await.unwrap();
        let names = runtime.container_names();
        let second = orch.up(&topo).await.unwrap();

        assert!(second.created.is_empty());
        assert!(second.networks_created.is_empty());
        assert_eq!(second.present.len(), 2);
        assert_eq!(runtime.container_names(), names);
        assert_eq!(runtime.create_count(), 2);
    }

    #[tokio::test]
    async fn up_restarts_stopped_containers() {
        let (runtime, _, orch) = setup();
        let topo = demo_topology();
        orch.up(&topo).await.unwrap();
        runtime.set_state("gridctl-demo-search", ContainerState::Exited);

        let report = orch.up(&topo).await.unwrap();
        assert_eq!(report.started, vec!["gridctl-demo-search"]);
        assert_eq!(report.present, vec!["gridctl-demo-fetch"]);
    }

    #[tokio::test]
    async fn pulls_only_missing_images() {
        let (runtime, _, orch) = setup();
        let mut topo = demo_topology();
        topo.mcp_servers.truncate(1);
        topo.resources.push(ResourceSpec {
            name: "db".into(),
            image: "postgres:16".into(),
            ports: vec!["5432:5432".into()],
            ..Default::default()
        });
        runtime.add_image("postgres:16");

        orch.up(&topo).await.unwrap();
        assert_eq!(runtime.pulls(), vec!["ghcr.io/acme/search:latest"]);
        let db = runtime.container_spec("gridctl-demo-db").unwrap();
        assert_eq!(db.publish, vec!["5432:5432"]);
        assert_eq!(db.labels["gridctl.resource"], "db");
    }

    #[tokio::test]
    async fn stdio_servers_keep_stdin_open() {
        let (runtime, _, orch) = setup();
        let mut topo = demo_topology();
        topo.mcp_servers = vec![McpServerSpec {
            name: "files".into(),
            image: "ghcr.io/acme/files".into(),
            transport: "stdio".into(),
            command: vec!["serve".into()],
            ..Default::default()
        }];
        orch.up(&topo).await.unwrap();

        let spec = runtime.container_spec("gridctl-demo-files").unwrap();
        assert!(spec.open_stdin);
        assert!(spec.publish.is_empty());
        assert_eq!(spec.command, vec!["serve"]);
    }

    #[tokio::test]
    async fn engine_unavailable_aborts_before_mutation() {
        let (runtime, builder, orch) = setup();
        runtime.set_reachable(false);

        let err = orch.up(&demo_topology()).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::EngineUnavailable(_)));
        assert!(err.to_string().contains("cannot reach container engine"));
        assert_eq!(builder.calls.load(Ordering::SeqCst), 0);

        runtime.set_reachable(true);
        assert!(runtime.container_names().is_empty());
        assert!(runtime.network_names().is_empty());
    }

    #[tokio::test]
    async fn partial_failure_keeps_successful_workloads() {
        let (runtime, _, orch) = setup();
        runtime.fail_on_pull("ghcr.io/acme/search:latest");

        let err = orch.up(&demo_topology()).await.unwrap_err();
        let OrchestratorError::PartialProvision { failures, report } = err else {
            panic!("expected partial provision failure");
        };
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].entity, "search");
        assert_eq!(failures[0].role, Role::McpServer);
        assert!(failures[0].error.contains("manifest unknown"));
        assert_eq!(report.created, vec!["gridctl-demo-fetch"]);
        assert_eq!(runtime.container_names(), vec!["gridctl-demo-fetch"]);
    }

    #[tokio::test]
    async fn down_on_unknown_topology_is_a_no_op() {
        let (_, _, orch) = setup();
        let report = orch.down("never-deployed").await.unwrap();
        assert_eq!(report, DownReport::default());
    }

    #[tokio::test]
    async fn down_keeps_network_used_by_others() {
        let (runtime, _, orch) = setup();
        orch.up(&demo_topology()).await.unwrap();
        runtime.add_foreign_container("sidecar", "demo-net");

        let report = orch.down("demo").await.unwrap();
        assert_eq!(report.containers_removed.len(), 2);
        assert_eq!(report.networks_kept, vec!["demo-net"]);
        assert_eq!(runtime.network_names(), vec!["demo-net"]);
    }

    #[tokio::test]
    async fn down_leaves_other_topologies_alone() {
        let (runtime, _, orch) = setup();
        orch.up(&demo_topology()).await.unwrap();

        let mut other = demo_topology();
        other.name = "other".into();
        other.network.name = "other-net".into();
        other.mcp_servers.truncate(1);
        orch.up(&other).await.unwrap();

        orch.down("demo").await.unwrap();
        assert_eq!(runtime.container_names(), vec!["gridctl-other-search"]);
        assert_eq!(orch.status(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn preexisting_unowned_network_is_reused_and_kept() {
        let (runtime, _, orch) = setup();
        runtime
            .create_network(&NetworkSpec {
                name: "demo-net".into(),
                driver: "bridge".into(),
                labels: Default::default(),
            })
            .await
            .unwrap();

        let report = orch.up(&demo_topology()).await.unwrap();
        assert!(report.networks_created.is_empty());

        let down = orch.down("demo").await.unwrap();
        assert!(down.networks_removed.is_empty());
        assert_eq!(runtime.network_names(), vec!["demo-net"]);
    }
}

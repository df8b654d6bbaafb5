//! Gateway process lifecycle: connect, refresh, bind, register, serve, clean up.

use std::{
    future::Future,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
};

use {
    anyhow::{Context, bail},
    gridctl_config::Topology,
    gridctl_mcp::{Gateway, GatewayConfig, McpBackend},
    gridctl_runtime::ContainerRuntime,
    gridctl_state::{DaemonState, StateStore},
    tokio::net::TcpListener,
    tracing::{info, warn},
};

use crate::{
    backends::backends_for,
    server::{build_gateway_app, log_banner, serve},
    state::GatewayState,
};

/// Default gateway port.
pub const DEFAULT_PORT: u16 = 8180;

#[derive(Debug, Clone)]
pub struct GatewayOptions {
    pub bind: IpAddr,
    /// `0` lets the OS pick; the bound port is what gets recorded.
    pub port: u16,
    pub config: GatewayConfig,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_PORT,
            config: GatewayConfig::default(),
        }
    }
}

/// A gateway that has refreshed its catalog, bound its port and registered
/// itself, ready to serve.
pub struct GatewayDaemon {
    state: Arc<GatewayState>,
    listener: TcpListener,
    addr: SocketAddr,
    store: StateStore,
}

impl GatewayDaemon {
    /// Connect to the topology's servers through `runtime` and start.
    pub async fn start(
        topology: &Topology,
        runtime: Arc<dyn ContainerRuntime>,
        store: StateStore,
        options: GatewayOptions,
    ) -> anyhow::Result<Self> {
        let backends = backends_for(topology, &runtime, options.config.timeout);
        Self::start_with_backends(&topology.name, backends, store, options).await
    }

    pub async fn start_with_backends(
        topology: &str,
        backends: Vec<Arc<dyn McpBackend>>,
        store: StateStore,
        options: GatewayOptions,
    ) -> anyhow::Result<Self> {
        if let Some(existing) = store.load(topology)?
            && store.is_running(&existing)
        {
            bail!(
                "gateway for topology '{topology}' is already running (pid {}, port {})",
                existing.pid,
                existing.port
            );
        }

        let gateway = Arc::new(Gateway::new(backends, options.config));
        let report = gateway.refresh().await;
        for (server, reason) in &report.unavailable {
            warn!(topology, server = %server, reason = %reason, "MCP server not reachable yet");
        }

        let listener = TcpListener::bind((options.bind, options.port))
            .await
            .with_context(|| format!("failed to bind {}:{}", options.bind, options.port))?;
        let addr = listener.local_addr()?;

        // Registered only once the port is ours.
        store.save(&DaemonState::current(topology, addr.port()))?;
        info!(topology, port = addr.port(), pid = std::process::id(), "gateway registered");

        Ok(Self {
            state: GatewayState::new(topology, gateway),
            listener,
            addr,
            store,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn state(&self) -> &Arc<GatewayState> {
        &self.state
    }

    /// Serve until `shutdown` resolves, then unregister and close backends.
    pub async fn serve(self, shutdown: impl Future<Output = ()> + Send + 'static) -> anyhow::Result<()> {
        let Self {
            state,
            listener,
            addr,
            store,
        } = self;
        log_banner(&state, addr);
        let served = serve(listener, build_gateway_app(Arc::clone(&state)), shutdown).await;

        unregister(&store, &state.topology);
        state.gateway.close().await;
        info!(topology = %state.topology, "gateway stopped");
        served
    }
}

/// Remove our record, leaving one written by a newer gateway alone.
fn unregister(store: &StateStore, topology: &str) {
    match store.load(topology) {
        Ok(Some(record)) if record.pid == std::process::id() => {
            if let Err(e) = store.delete(topology) {
                warn!(topology, error = %e, "failed to remove daemon state");
            }
        },
        Ok(_) => {},
        Err(e) => warn!(topology, error = %e, "failed to read daemon state"),
    }
}

/// Run a gateway for `topology` in the foreground until SIGINT/SIGTERM.
pub async fn run_gateway(
    topology: &Topology,
    runtime: Arc<dyn ContainerRuntime>,
    store: StateStore,
    options: GatewayOptions,
) -> anyhow::Result<()> {
    GatewayDaemon::start(topology, runtime, store, options)
        .await?
        .serve(shutdown_signal())
        .await
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM (what `gridctl stop` sends).
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            },
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl-C, shutting down"),
        () = terminate => info!("received SIGTERM, shutting down"),
    }
}

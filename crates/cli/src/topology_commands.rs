use std::{
    fs::OpenOptions,
    net::{IpAddr, Ipv4Addr},
    path::{Path, PathBuf},
    process::{Command, Stdio},
    sync::Arc,
    time::{Duration, Instant},
};

use {
    anyhow::{Context, Result, bail},
    gridctl_config::{Topology, load_topology, logs_dir},
    gridctl_gateway::{GatewayOptions, run_gateway},
    gridctl_mcp::GatewayConfig,
    gridctl_runtime::{
        ContainerRuntime, DownReport, Orchestrator, OrchestratorError, UpReport, select_runtime,
    },
    gridctl_state::{DaemonState, StateStore, StopOutcome, TopologyLock, process},
    tracing::{debug, info},
};

use crate::GatewayArgs;

/// How long `deploy` waits for a detached gateway to register itself.
const GATEWAY_START_TIMEOUT: Duration = Duration::from_secs(30);

const GATEWAY_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Global flags forwarded to a detached gateway process.
pub struct Globals {
    pub runtime: String,
    pub log_level: String,
    pub json_logs: bool,
}

pub enum GatewayMode {
    None,
    Foreground,
    Detached,
}

fn load(file: &Path) -> Result<Topology> {
    load_topology(file).with_context(|| format!("failed to load topology {}", file.display()))
}

fn runtime(globals: &Globals) -> Result<Arc<dyn ContainerRuntime>> {
    select_runtime(&globals.runtime).context("failed to select container runtime")
}

fn gateway_options(args: &GatewayArgs) -> GatewayOptions {
    GatewayOptions {
        bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port: args.port,
        config: GatewayConfig {
            naming: args.tool_naming,
            ..GatewayConfig::default()
        },
    }
}

pub async fn deploy(globals: &Globals, file: &Path, args: &GatewayArgs, mode: GatewayMode) -> Result<()> {
    let topology = load(file)?;
    let runtime = runtime(globals)?;
    let store = StateStore::new();

    let report = {
        let mut lock = TopologyLock::open(&store, &topology.name)?;
        let _guard = lock.try_acquire()?;
        let orchestrator = Orchestrator::new(Arc::clone(&runtime));
        match orchestrator.up(&topology).await {
            Ok(report) => report,
            Err(OrchestratorError::PartialProvision { failures, report }) => {
                print_up_report(&topology.name, &report);
                for failure in &failures {
                    eprintln!("  failed  {failure}");
                }
                bail!(
                    "{} of topology '{}' failed to provision; the rest was left running",
                    failures.len(),
                    topology.name
                );
            },
            Err(e) => return Err(e.into()),
        }
    };
    print_up_report(&topology.name, &report);

    match mode {
        GatewayMode::None => Ok(()),
        GatewayMode::Foreground => run_gateway(&topology, runtime, store, gateway_options(args)).await,
        GatewayMode::Detached => {
            let state = spawn_detached_gateway(globals, file, &topology.name, args, &store).await?;
            println!(
                "Gateway for '{}' running at http://127.0.0.1:{}/mcp (pid {})",
                state.topology, state.port, state.pid
            );
            Ok(())
        },
    }
}

fn print_up_report(topology: &str, report: &UpReport) {
    println!("Topology '{topology}':");
    for network in &report.networks_created {
        println!("  network {network} created");
    }
    for container in &report.created {
        println!("  {container} created");
    }
    for container in &report.started {
        println!("  {container} started");
    }
    for container in &report.present {
        println!("  {container} already running");
    }
}

/// Start `gridctl gateway <file>` as a detached child logging to
/// `<home>/logs/<topology>.log`, and wait until it has registered.
async fn spawn_detached_gateway(
    globals: &Globals,
    file: &Path,
    topology: &str,
    args: &GatewayArgs,
    store: &StateStore,
) -> Result<DaemonState> {
    if let Some(existing) = store.load(topology)?
        && store.is_running(&existing)
    {
        info!(topology, pid = existing.pid, "gateway already running");
        return Ok(existing);
    }

    let logs = logs_dir();
    std::fs::create_dir_all(&logs)
        .with_context(|| format!("failed to create {}", logs.display()))?;
    let log_path = logs.join(format!("{topology}.log"));
    let log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("failed to open {}", log_path.display()))?;

    let file = std::fs::canonicalize(file).unwrap_or_else(|_| PathBuf::from(file));
    let exe = std::env::current_exe().context("cannot locate the gridctl executable")?;
    let mut command = Command::new(exe);
    command
        .arg("--runtime")
        .arg(&globals.runtime)
        .arg("--log-level")
        .arg(&globals.log_level)
        .arg("gateway")
        .arg(&file)
        .arg("--port")
        .arg(args.port.to_string())
        .arg("--tool-naming")
        .arg(args.tool_naming.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::from(log.try_clone()?))
        .stderr(Stdio::from(log));
    if globals.json_logs {
        command.arg("--json-logs");
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // Own process group: the terminal's Ctrl-C must not reach the gateway.
        command.process_group(0);
    }

    let mut child = command.spawn().context("failed to start gateway process")?;
    let pid = child.id();
    debug!(topology, pid, log = %log_path.display(), "spawned detached gateway");

    let deadline = Instant::now() + GATEWAY_START_TIMEOUT;
    loop {
        if let Some(state) = store.load(topology)?
            && state.pid == pid
        {
            return Ok(state);
        }
        if let Some(status) = child.try_wait()? {
            bail!(
                "gateway exited during startup ({status}); see {}",
                log_path.display()
            );
        }
        if Instant::now() >= deadline {
            bail!(
                "gateway did not register within {}s; see {}",
                GATEWAY_START_TIMEOUT.as_secs(),
                log_path.display()
            );
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

pub async fn destroy(globals: &Globals, file: &Path) -> Result<()> {
    let topology = load(file)?;
    let runtime = runtime(globals)?;
    let store = StateStore::new();

    let mut lock = TopologyLock::open(&store, &topology.name)?;
    let _guard = lock.try_acquire()?;

    stop_gateway(&store, &topology.name).await?;

    let orchestrator = Orchestrator::new(runtime);
    match orchestrator.down(&topology.name).await {
        Ok(report) => {
            print_down_report(&topology.name, &report);
            Ok(())
        },
        Err(OrchestratorError::PartialTeardown { failures, report }) => {
            print_down_report(&topology.name, &report);
            for failure in &failures {
                eprintln!("  failed  {failure}");
            }
            bail!("topology '{}' was only partially removed", topology.name);
        },
        Err(e) => Err(e.into()),
    }
}

fn print_down_report(topology: &str, report: &DownReport) {
    if report.containers_removed.is_empty() && report.networks_removed.is_empty() {
        println!("Topology '{topology}': nothing to remove");
        return;
    }
    println!("Topology '{topology}':");
    for container in &report.containers_removed {
        println!("  {container} removed");
    }
    for network in &report.networks_removed {
        println!("  network {network} removed");
    }
    for network in &report.networks_kept {
        println!("  network {network} kept (still in use)");
    }
}

pub async fn gateway(globals: &Globals, file: &Path, args: &GatewayArgs) -> Result<()> {
    let topology = load(file)?;
    let runtime = runtime(globals)?;
    run_gateway(&topology, runtime, StateStore::new(), gateway_options(args)).await
}

pub async fn stop(topology: Option<&str>) -> Result<()> {
    let store = StateStore::new();
    let names: Vec<String> = match topology {
        Some(name) => vec![name.to_string()],
        None => store.list()?.into_iter().map(|s| s.topology).collect(),
    };
    if names.is_empty() {
        println!("No gateways recorded.");
        return Ok(());
    }
    for name in names {
        stop_gateway(&store, &name).await?;
    }
    Ok(())
}

/// Signal the topology's gateway and give it time to close its backends.
async fn stop_gateway(store: &StateStore, topology: &str) -> Result<()> {
    match store.stop(topology)? {
        StopOutcome::NotRecorded => println!("No gateway recorded for '{topology}'"),
        StopOutcome::Stale => println!("Gateway for '{topology}' was not running; record removed"),
        StopOutcome::Signalled { pid } => {
            if process::wait_for_exit(pid, GATEWAY_STOP_TIMEOUT).await {
                println!("Stopped gateway for '{topology}' (pid {pid})");
            } else {
                println!(
                    "Signalled gateway for '{topology}' (pid {pid}); still exiting after {}s",
                    GATEWAY_STOP_TIMEOUT.as_secs()
                );
            }
        },
    }
    Ok(())
}

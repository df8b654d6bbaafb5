mod cache_commands;
mod status_commands;
mod topology_commands;

use std::{io::IsTerminal, path::PathBuf};

use {
    clap::{Parser, Subcommand, builder::PossibleValuesParser},
    gridctl_gateway::DEFAULT_PORT,
    gridctl_mcp::ToolNaming,
    gridctl_runtime::BACKENDS,
    tracing::debug,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(
    name = "gridctl",
    version,
    about = "gridctl: deploy MCP server topologies and serve them through one gateway"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Container engine CLI to drive (docker or podman).
    #[arg(
        long,
        global = true,
        env = "GRIDCTL_RUNTIME",
        default_value = "docker",
        value_parser = PossibleValuesParser::new(BACKENDS.iter().copied())
    )]
    runtime: String,
}

/// Settings shared by everything that starts a gateway.
#[derive(clap::Args, Clone)]
struct GatewayArgs {
    /// Gateway listen port.
    #[arg(long, env = "GRIDCTL_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// How tool names from different servers are exposed (prefixed or bare).
    #[arg(long, env = "GRIDCTL_TOOL_NAMING", default_value_t = ToolNaming::Prefixed)]
    tool_naming: ToolNaming,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision a topology and start its gateway.
    Deploy {
        /// Topology file.
        file: PathBuf,
        #[command(flatten)]
        gateway: GatewayArgs,
        /// Run the gateway in this process instead of detaching it.
        #[arg(long)]
        foreground: bool,
        /// Only provision containers and networks.
        #[arg(long, conflicts_with = "foreground")]
        no_gateway: bool,
    },
    /// Stop a topology's gateway and remove its containers and networks.
    Destroy {
        /// Topology file.
        file: PathBuf,
    },
    /// Show gateways and managed containers.
    Status {
        /// Only show this topology.
        #[arg(long)]
        topology: Option<String>,
    },
    /// Run the gateway for an already deployed topology in the foreground.
    Gateway {
        /// Topology file.
        file: PathBuf,
        #[command(flatten)]
        gateway: GatewayArgs,
    },
    /// Stop a running gateway (all gateways when no topology is given).
    Stop {
        topology: Option<String>,
    },
    /// Build cache management.
    Cache {
        #[command(subcommand)]
        action: cache_commands::CacheAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(std::io::stdout().is_terminal()),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    debug!(version = env!("CARGO_PKG_VERSION"), runtime = %cli.runtime, "gridctl starting");

    let globals = topology_commands::Globals {
        runtime: cli.runtime.clone(),
        log_level: cli.log_level.clone(),
        json_logs: cli.json_logs,
    };

    match cli.command {
        Commands::Deploy {
            file,
            gateway,
            foreground,
            no_gateway,
        } => {
            let mode = if no_gateway {
                topology_commands::GatewayMode::None
            } else if foreground {
                topology_commands::GatewayMode::Foreground
            } else {
                topology_commands::GatewayMode::Detached
            };
            topology_commands::deploy(&globals, &file, &gateway, mode).await
        },
        Commands::Destroy { file } => topology_commands::destroy(&globals, &file).await,
        Commands::Status { topology } => {
            status_commands::handle_status(&globals.runtime, topology.as_deref()).await
        },
        Commands::Gateway { file, gateway } => {
            topology_commands::gateway(&globals, &file, &gateway).await
        },
        Commands::Stop { topology } => topology_commands::stop(topology.as_deref()).await,
        Commands::Cache { action } => cache_commands::handle_cache(action),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {super::*, clap::CommandFactory};

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn deploy_flags() {
        let cli = Cli::try_parse_from([
            "gridctl",
            "--runtime",
            "podman",
            "deploy",
            "topo.yaml",
            "--port",
            "9000",
            "--tool-naming",
            "bare",
            "--foreground",
        ])
        .unwrap();
        assert_eq!(cli.runtime, "podman");
        let Commands::Deploy {
            file,
            gateway,
            foreground,
            no_gateway,
        } = cli.command
        else {
            panic!("expected deploy");
        };
        assert_eq!(file, PathBuf::from("topo.yaml"));
        assert_eq!(gateway.port, 9000);
        assert_eq!(gateway.tool_naming, ToolNaming::Bare);
        assert!(foreground);
        assert!(!no_gateway);
    }

    #[test]
    fn foreground_and_no_gateway_conflict() {
        assert!(
            Cli::try_parse_from([
                "gridctl",
                "deploy",
                "topo.yaml",
                "--foreground",
                "--no-gateway"
            ])
            .is_err()
        );
    }

    #[test]
    fn unknown_runtime_is_rejected() {
        assert!(Cli::try_parse_from(["gridctl", "--runtime", "lxc", "status"]).is_err());
    }

    #[test]
    fn stop_without_topology() {
        let cli = Cli::try_parse_from(["gridctl", "stop"]).unwrap();
        assert!(matches!(cli.command, Commands::Stop { topology: None }));
    }
}

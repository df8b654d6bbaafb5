//! Gateway: the long-lived process that aggregates a topology's MCP servers
//! behind one HTTP endpoint.
//!
//! Lifecycle:
//! 1. Refuse to start if a live gateway is already recorded for the topology
//! 2. Connect to every MCP server container and refresh the tool catalog
//! 3. Bind the port and save the daemon state record
//! 4. Serve `/mcp` plus the health and status endpoints
//! 5. On SIGINT/SIGTERM remove the record and close backend connections

pub mod backends;
pub mod daemon;
pub mod methods;
pub mod server;
pub mod state;

#[cfg(test)]
mod tests_support;

pub use {
    backends::{ContainerBackend, backends_for},
    daemon::{DEFAULT_PORT, GatewayDaemon, GatewayOptions, run_gateway, shutdown_signal},
    server::build_gateway_app,
    state::GatewayState,
};

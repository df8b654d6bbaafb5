//! Topology model: schema, environment expansion, defaulting, validation and
//! the on-disk locations gridctl keeps its state in.

pub mod env_subst;
pub mod error;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    error::{ConfigError, ValidationIssue},
    loader::{cache_dir, data_dir, load_topology, logs_dir, state_dir},
    schema::{McpServerSpec, Network, ResourceSpec, Source, SourceKind, Topology, Transport},
    validate::validate,
};

//! Container runtime abstraction, engine bindings and the orchestrator that
//! reconciles a topology against them.

pub mod builder;
pub mod docker;
pub mod error;
pub mod labels;
pub mod memory;
pub mod orchestrator;
pub mod runtime;
pub mod types;

pub use {
    builder::{GitSourceBuilder, SourceBuilder, cache_path_for},
    docker::DockerRuntime,
    error::{Result, RuntimeError},
    labels::{Role, container_name},
    memory::MemoryRuntime,
    orchestrator::{
        DownReport, EntityFailure, Orchestrator, OrchestratorError, UpReport, WorkloadStatus,
    },
    runtime::{BACKENDS, ContainerRuntime, ContainerStream, select_runtime},
    types::{ContainerInfo, ContainerSpec, ContainerState, LabelFilter},
};

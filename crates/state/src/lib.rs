//! Durable per-topology records of running gateway daemons.

pub mod error;
pub mod lock;
pub mod process;
pub mod store;

pub use {
    error::StateError,
    lock::TopologyLock,
    store::{DaemonState, StateStore, StopOutcome},
};

use std::{
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};

use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    tempfile::NamedTempFile,
    tracing::{debug, info, warn},
};

use crate::{error::StateError, process};

/// Control endpoint of a running gateway for one topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonState {
    pub topology: String,
    pub port: u16,
    pub pid: u32,
    /// RFC 3339.
    pub started_at: DateTime<Utc>,
}

impl DaemonState {
    /// Record for the current process.
    pub fn current(topology: impl Into<String>, port: u16) -> Self {
        Self {
            topology: topology.into(),
            port,
            pid: std::process::id(),
            started_at: Utc::now(),
        }
    }
}

/// What `StateStore::stop` found and did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// No record existed.
    NotRecorded,
    /// A record existed but its process was already gone.
    Stale,
    /// The recorded process was signalled to terminate.
    Signalled { pid: u32 },
}

/// One JSON record per topology under `<home>/state/`.
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    pub fn new() -> Self {
        Self {
            dir: gridctl_config::state_dir(),
        }
    }

    /// Create a store rooted at a specific directory (useful for testing).
    pub fn with_root(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, topology: &str) -> Result<PathBuf, StateError> {
        check_name(topology)?;
        Ok(self.dir.join(format!("{topology}.json")))
    }

    /// Atomically write (or overwrite) the record for `state.topology`.
    pub fn save(&self, state: &DaemonState) -> Result<(), StateError> {
        let path = self.path_for(&state.topology)?;
        std::fs::create_dir_all(&self.dir).map_err(|e| StateError::io(&self.dir, e))?;

        let content = serde_json::to_string_pretty(state)?;
        let mut temp = NamedTempFile::new_in(&self.dir).map_err(|e| StateError::io(&self.dir, e))?;
        temp.write_all(content.as_bytes())
            .and_then(|()| temp.flush())
            .map_err(|e| StateError::io(temp.path(), e))?;
        temp.persist(&path).map_err(|source| StateError::Persist {
            path: path.clone(),
            source,
        })?;

        debug!(topology = %state.topology, port = state.port, pid = state.pid, "saved daemon state");
        Ok(())
    }

    /// Read one record. Missing or corrupt records yield `None`.
    pub fn load(&self, topology: &str) -> Result<Option<DaemonState>, StateError> {
        let path = self.path_for(topology)?;
        read_record(&path)
    }

    /// Every readable record, sorted by topology name.
    pub fn list(&self) -> Result<Vec<DaemonState>, StateError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StateError::io(&self.dir, e)),
        };

        let mut states = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StateError::io(&self.dir, e))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_record(&path) {
                Ok(Some(state)) => states.push(state),
                Ok(None) => {},
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable daemon state"),
            }
        }
        states.sort_by(|a, b| a.topology.cmp(&b.topology));
        Ok(states)
    }

    /// Remove a record. Removing an absent record succeeds.
    pub fn delete(&self, topology: &str) -> Result<(), StateError> {
        let path = self.path_for(topology)?;
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!(topology, "deleted daemon state");
                Ok(())
            },
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StateError::io(path, e)),
        }
    }

    /// Whether the recorded process is alive. A stale record is "stopped".
    pub fn is_running(&self, state: &DaemonState) -> bool {
        process::is_alive(state.pid)
    }

    /// Signal a live gateway to shut down and forget its record.
    pub fn stop(&self, topology: &str) -> Result<StopOutcome, StateError> {
        let Some(state) = self.load(topology)? else {
            return Ok(StopOutcome::NotRecorded);
        };

        let outcome = if self.is_running(&state) && process::terminate(state.pid) {
            info!(topology, pid = state.pid, "signalled gateway to stop");
            StopOutcome::Signalled { pid: state.pid }
        } else {
            debug!(topology, pid = state.pid, "removing stale daemon state");
            StopOutcome::Stale
        };
        self.delete(topology)?;
        Ok(outcome)
    }
}

fn read_record(path: &Path) -> Result<Option<DaemonState>, StateError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StateError::io(path, e)),
    };
    match serde_json::from_str(&raw) {
        Ok(state) => Ok(Some(state)),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring corrupt daemon state");
            Ok(None)
        },
    }
}

/// Topology names become file names; keep them to a single path component.
fn check_name(topology: &str) -> Result<(), StateError> {
    let valid = !topology.is_empty()
        && topology != "."
        && topology != ".."
        && !topology.contains(['/', '\\', '\0']);
    if valid {
        Ok(())
    } else {
        Err(StateError::InvalidName(topology.to_string()))
    }
}

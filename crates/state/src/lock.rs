//! Cross-process advisory lock serializing mutations of one topology.

use std::{
    fs::{File, OpenOptions},
    io::ErrorKind,
    path::{Path, PathBuf},
};

use fd_lock::{RwLock, RwLockWriteGuard};

use crate::{error::StateError, store::StateStore};

/// Advisory lock file `<state-dir>/<topology>.lock`.
///
/// Open it once, then hold the guard returned by [`TopologyLock::try_acquire`]
/// for as long as the mutation runs.
pub struct TopologyLock {
    topology: String,
    path: PathBuf,
    lock: RwLock<File>,
}

impl TopologyLock {
    pub fn open(store: &StateStore, topology: &str) -> Result<Self, StateError> {
        // Validates the name the same way state records do.
        store.path_for(topology)?;
        Self::open_in(store.dir(), topology)
    }

    fn open_in(dir: &Path, topology: &str) -> Result<Self, StateError> {
        std::fs::create_dir_all(dir).map_err(|e| StateError::io(dir, e))?;
        let path = dir.join(format!("{topology}.lock"));
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| StateError::io(&path, e))?;
        Ok(Self {
            topology: topology.to_string(),
            path,
            lock: RwLock::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Take the lock without waiting; fails with [`StateError::Locked`] when
    /// another process holds it.
    pub fn try_acquire(&mut self) -> Result<RwLockWriteGuard<'_, File>, StateError> {
        match self.lock.try_write() {
            Ok(guard) => Ok(guard),
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                Err(StateError::Locked(self.topology.clone()))
            },
            Err(e) => Err(StateError::io(&self.path, e)),
        }
    }
}

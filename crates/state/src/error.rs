use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("encoding daemon state: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("replacing {}: {}", .path.display(), .source.error)]
    Persist {
        path: PathBuf,
        #[source]
        source: tempfile::PersistError,
    },

    #[error("invalid topology name '{0}' for a state record")]
    InvalidName(String),

    #[error("topology '{0}' is locked by another gridctl process")]
    Locked(String),
}

impl StateError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

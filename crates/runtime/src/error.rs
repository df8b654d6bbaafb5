use thiserror::Error;

pub type Result<T, E = RuntimeError> = std::result::Result<T, E>;

/// Errors surfaced by a container runtime binding.
///
/// Engine failures always carry the operation and the entity they concern.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("cannot reach container engine: {0}")]
    Unavailable(String),

    #[error("{op} {entity}: not found")]
    NotFound { op: &'static str, entity: String },

    #[error("{op} {entity}: {message}")]
    Engine {
        op: &'static str,
        entity: String,
        message: String,
    },

    #[error("{op} {entity}: {source}")]
    Io {
        op: &'static str,
        entity: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unknown runtime backend '{0}'")]
    UnknownBackend(String),
}

impl RuntimeError {
    pub fn engine(op: &'static str, entity: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Engine {
            op,
            entity: entity.into(),
            message: message.into(),
        }
    }

    pub fn not_found(op: &'static str, entity: impl Into<String>) -> Self {
        Self::NotFound {
            op,
            entity: entity.into(),
        }
    }

    /// Whether the entity the operation targeted does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

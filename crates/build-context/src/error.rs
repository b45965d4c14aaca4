use std::path::PathBuf;
use thiserror::Error;

/// Failures raised while preparing a build context from an uploaded archive.
#[derive(Debug, Error)]
pub enum BuildError {
    /// An entry tried to resolve outside of the workspace root.
    #[error("path traversal attempt: entry '{entry}' {reason}")]
    Security { entry: String, reason: &'static str },

    #[error("{message}: {}", path.display())]
    Configuration { message: String, path: PathBuf },

    #[error("failed to materialize entry '{entry}': {source}")]
    Io {
        entry: String,
        source: std::io::Error,
    },

    #[error("failed to allocate workspace at {}: {source}", path.display())]
    Resource {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("malformed archive: {message}")]
    MalformedArchive { message: String },

    #[error("archive exceeds {limit} limit of {max}")]
    LimitExceeded { limit: &'static str, max: u64 },
}

impl BuildError {
    pub fn io(entry: impl Into<String>, source: std::io::Error) -> Self {
        BuildError::Io {
            entry: entry.into(),
            source,
        }
    }

    /// Stable machine-readable code, surfaced in API responses.
    pub fn code(&self) -> &'static str {
        match self {
            BuildError::Security { .. } => "SECURITY_ERROR",
            BuildError::Configuration { .. } => "CONFIGURATION_ERROR",
            BuildError::Io { .. } => "IO_ERROR",
            BuildError::Resource { .. } => "RESOURCE_ERROR",
            BuildError::MalformedArchive { .. } => "MALFORMED_ARCHIVE",
            BuildError::LimitExceeded { .. } => "LIMIT_EXCEEDED",
        }
    }
}

pub type Result<T, E = BuildError> = std::result::Result<T, E>;

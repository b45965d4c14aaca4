use crate::error::{BuildError, Result};
use crate::workspace::Workspace;
use std::fs;
use std::path::PathBuf;
use tracing::debug;

/// File the engine reads its build instructions from.
pub const DESCRIPTOR_FILE_NAME: &str = "Dockerfile";

/// Locate the build descriptor directly under the workspace root.
///
/// Only `<root>/Dockerfile` is honored; nested descriptors are ignored. The
/// path must be a regular file, and a symlink is not followed.
pub fn locate(workspace: &Workspace) -> Result<PathBuf> {
    let path = workspace.root().join(DESCRIPTOR_FILE_NAME);

    match fs::symlink_metadata(&path) {
        Ok(meta) if meta.file_type().is_file() => {
            debug!("Dockerfile: {}", path.display());
            Ok(path)
        }
        _ => Err(BuildError::Configuration {
            message: format!("{} not present", DESCRIPTOR_FILE_NAME),
            path,
        }),
    }
}

//! Per-request scratch directories.
//!
//! Every upload gets its own directory under the configured base, named with
//! a fixed prefix and a fresh v4 uuid, so concurrent requests never share a
//! path and no lock is needed. The raw upload is spooled to a sibling file
//! (`<root>.zip`) so it never becomes part of the build context. A
//! [`Workspace`] removes its directory and spool file exactly once: either
//! through [`Workspace::release`] or, on any early return or unwind, from its
//! `Drop` impl.

use crate::error::{BuildError, Result};
use chrono::{DateTime, Utc};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

/// Prefix shared by every workspace directory this process creates.
pub const WORKSPACE_PREFIX: &str = "lmbd.";

/// Extension of the spooled upload kept beside each workspace directory.
pub const SPOOL_EXTENSION: &str = "zip";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceState {
    Active,
    TearingDown,
    Removed,
}

/// Allocates workspaces below a base directory.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    base_dir: PathBuf,
}

impl WorkspaceManager {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Manager rooted at the platform temp directory.
    pub fn from_temp_dir() -> Self {
        Self::new(std::env::temp_dir())
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Create a fresh, empty workspace directory.
    #[instrument(skip(self), fields(base = %self.base_dir.display()))]
    pub fn acquire(&self) -> Result<Workspace> {
        let token = Uuid::new_v4();
        let root = self
            .base_dir
            .join(format!("{}{}", WORKSPACE_PREFIX, token));
        let spool = self
            .base_dir
            .join(format!("{}{}.{}", WORKSPACE_PREFIX, token, SPOOL_EXTENSION));

        // The workspace root itself must not already exist.
        if let Err(source) = fs::create_dir_all(&self.base_dir).and_then(|_| fs::create_dir(&root))
        {
            return Err(BuildError::Resource { path: root, source });
        }

        debug!("created workspace directory: {}", root.display());

        Ok(Workspace {
            token,
            root,
            spool,
            created_at: Utc::now(),
            state: WorkspaceState::Active,
        })
    }
}

/// An exclusively owned scratch directory holding one request's build context.
#[derive(Debug)]
pub struct Workspace {
    token: Uuid,
    root: PathBuf,
    spool: PathBuf,
    created_at: DateTime<Utc>,
    state: WorkspaceState,
}

impl Workspace {
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the raw upload is written before extraction. Not created here.
    pub fn spool_path(&self) -> &Path {
        &self.spool
    }

    pub fn token(&self) -> Uuid {
        self.token
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn state(&self) -> WorkspaceState {
        self.state
    }

    /// Recursively remove the workspace and its spool file.
    ///
    /// A failure here is secondary to whatever the request produced: it is
    /// logged and handed back for inspection, and callers are expected not to
    /// let it replace their primary result.
    pub fn release(mut self) -> io::Result<()> {
        self.teardown()
    }

    fn teardown(&mut self) -> io::Result<()> {
        if self.state != WorkspaceState::Active {
            return Ok(());
        }
        self.state = WorkspaceState::TearingDown;

        let dir = ignore_missing(fs::remove_dir_all(&self.root));
        let spool = ignore_missing(fs::remove_file(&self.spool));
        let result = dir.and(spool);

        match &result {
            Ok(()) => info!(
                workspace = %self.token,
                lifetime_ms = (Utc::now() - self.created_at).num_milliseconds(),
                "removed workspace {}",
                self.root.display()
            ),
            Err(err) => error!(
                workspace = %self.token,
                "failed to remove workspace {}: {}",
                self.root.display(),
                err
            ),
        }

        self.state = WorkspaceState::Removed;
        result
    }
}

fn ignore_missing(result: io::Result<()>) -> io::Result<()> {
    match result {
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        // Errors are already logged by teardown.
        let _ = self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_creates_unique_prefixed_directories() {
        let base = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(base.path());

        let first = manager.acquire().unwrap();
        let second = manager.acquire().unwrap();

        assert_ne!(first.root(), second.root());
        assert!(first.root().is_dir());
        assert!(second.root().is_dir());
        assert!(first
            .root()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with(WORKSPACE_PREFIX));
        assert_eq!(fs::read_dir(first.root()).unwrap().count(), 0);
        assert_eq!(first.state(), WorkspaceState::Active);
    }

    #[test]
    fn release_removes_nested_contents() {
        let base = tempfile::tempdir().unwrap();
        let workspace = WorkspaceManager::new(base.path()).acquire().unwrap();
        let root = workspace.root().to_path_buf();
        fs::create_dir_all(root.join("a/b")).unwrap();
        fs::write(root.join("a/b/c.txt"), b"data").unwrap();

        workspace.release().unwrap();

        assert!(!root.exists());
    }

    #[test]
    fn drop_removes_workspace() {
        let base = tempfile::tempdir().unwrap();
        let root = {
            let workspace = WorkspaceManager::new(base.path()).acquire().unwrap();
            fs::write(workspace.root().join("f"), b"x").unwrap();
            workspace.root().to_path_buf()
        };
        assert!(!root.exists());
    }

    #[test]
    fn release_tolerates_already_missing_root() {
        let base = tempfile::tempdir().unwrap();
        let workspace = WorkspaceManager::new(base.path()).acquire().unwrap();
        fs::remove_dir_all(workspace.root()).unwrap();
        assert!(workspace.release().is_ok());
    }

    #[test]
    fn release_removes_spool_file() {
        let base = tempfile::tempdir().unwrap();
        let workspace = WorkspaceManager::new(base.path()).acquire().unwrap();
        let spool = workspace.spool_path().to_path_buf();
        fs::write(&spool, b"PK").unwrap();
        assert_eq!(spool.parent(), workspace.root().parent());

        workspace.release().unwrap();

        assert!(!spool.exists());
        assert_eq!(fs::read_dir(base.path()).unwrap().count(), 0);
    }

    /// Makes `<root>/locked` undeletable. Returns `None` when permissions
    /// are not enforced for this user (e.g. root).
    #[cfg(unix)]
    fn lock_subdirectory(root: &Path) -> Option<PathBuf> {
        use std::os::unix::fs::PermissionsExt;

        let locked = root.join("locked");
        fs::create_dir(&locked).unwrap();
        fs::write(locked.join("pinned"), b"x").unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o500)).unwrap();

        if fs::write(locked.join("canary"), b"").is_ok() {
            unlock(&locked);
            return None;
        }
        Some(locked)
    }

    #[cfg(unix)]
    fn unlock(dir: &Path) {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir, fs::Permissions::from_mode(0o700)).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn failed_teardown_is_reported_and_still_ends_removed() {
        let base = tempfile::tempdir().unwrap();
        let mut workspace = WorkspaceManager::new(base.path()).acquire().unwrap();
        let Some(locked) = lock_subdirectory(workspace.root()) else {
            return;
        };

        let result = workspace.teardown();

        assert!(result.is_err());
        assert_eq!(workspace.state(), WorkspaceState::Removed);
        // A second teardown (as Drop would run) is a no-op.
        assert!(workspace.teardown().is_ok());
        assert!(workspace.root().exists());

        unlock(&locked);
        fs::remove_dir_all(workspace.root()).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn release_hands_back_teardown_error() {
        let base = tempfile::tempdir().unwrap();
        let workspace = WorkspaceManager::new(base.path()).acquire().unwrap();
        let root = workspace.root().to_path_buf();
        let Some(locked) = lock_subdirectory(&root) else {
            return;
        };

        let err = workspace.release().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);

        unlock(&locked);
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn acquire_fails_with_resource_error_when_base_is_a_file() {
        let base = tempfile::tempdir().unwrap();
        let file = base.path().join("not-a-dir");
        fs::write(&file, b"").unwrap();

        let err = WorkspaceManager::new(&file).acquire().unwrap_err();
        assert!(matches!(err, BuildError::Resource { .. }));
    }
}

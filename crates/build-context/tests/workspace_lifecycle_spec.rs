//! Workspaces disappear on every exit path.

use build_context::{
    descriptor,
    extract::{extract, extract_upload},
    BuildError, ExtractLimits, WorkspaceManager,
};
use std::io::{Cursor, Write};
use std::panic;
use std::path::PathBuf;

fn prepare(manager: &WorkspaceManager, archive: Vec<u8>) -> Result<PathBuf, (PathBuf, BuildError)> {
    let workspace = manager.acquire().map_err(|e| (PathBuf::new(), e))?;
    let root = workspace.root().to_path_buf();
    extract(Cursor::new(archive), &workspace, &ExtractLimits::default())
        .map_err(|e| (root.clone(), e))?;
    descriptor::locate(&workspace).map_err(|e| (root.clone(), e))?;
    Ok(root)
}

#[test]
fn failed_extraction_leaves_no_workspace() {
    let base = tempfile::tempdir().unwrap();
    let manager = WorkspaceManager::new(base.path());

    let (root, err) = prepare(&manager, b"garbage".to_vec()).unwrap_err();

    assert!(matches!(err, BuildError::MalformedArchive { .. }));
    assert!(!root.exists());
    assert_eq!(std::fs::read_dir(base.path()).unwrap().count(), 0);
}

#[test]
fn failed_upload_leaves_neither_workspace_nor_spool() {
    let base = tempfile::tempdir().unwrap();
    let manager = WorkspaceManager::new(base.path());
    let workspace = manager.acquire().unwrap();

    let err = extract_upload(&b"garbage"[..], &workspace, &ExtractLimits::default()).unwrap_err();
    assert!(matches!(err, BuildError::MalformedArchive { .. }));
    assert!(workspace.spool_path().exists());

    drop(workspace);
    assert_eq!(std::fs::read_dir(base.path()).unwrap().count(), 0);
}

#[test]
fn missing_descriptor_leaves_no_workspace() {
    let base = tempfile::tempdir().unwrap();
    let manager = WorkspaceManager::new(base.path());

    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    writer
        .start_file("README.md", zip::write::FileOptions::default())
        .unwrap();
    writer.write_all(b"no descriptor here").unwrap();
    let archive = writer.finish().unwrap().into_inner();

    let (root, err) = prepare(&manager, archive).unwrap_err();

    assert!(matches!(err, BuildError::Configuration { .. }));
    assert!(!root.exists());
}

#[test]
fn panic_while_workspace_is_held_still_removes_it() {
    let base = tempfile::tempdir().unwrap();
    let manager = WorkspaceManager::new(base.path());
    let workspace = manager.acquire().unwrap();
    let root = workspace.root().to_path_buf();
    std::fs::write(root.join("partial"), b"half written").unwrap();

    let result = panic::catch_unwind(panic::AssertUnwindSafe(move || {
        let _held = workspace;
        panic!("build step blew up");
    }));

    assert!(result.is_err());
    assert!(!root.exists());
}

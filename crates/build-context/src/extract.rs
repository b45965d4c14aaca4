//! ZIP extraction into a [`Workspace`].
//!
//! An upload is first spooled to disk next to its workspace, then read
//! through the archive's central directory, so entries written with
//! trailing data descriptors are handled and the archive is never held in
//! memory as a whole. Every entry name is resolved lexically against the
//! workspace root before anything touches the filesystem; the first entry
//! that would land outside the root aborts the whole extraction.
//!
//! Entries are only ever materialized as plain directories and regular
//! files. Symlink entries are written out as regular files holding the link
//! target text, so nothing created here can redirect a later write.

use crate::error::{BuildError, Result};
use crate::workspace::Workspace;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, Write};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, instrument, warn};
use zip::result::ZipError;
use zip::ZipArchive;


/// Size of the buffer used to stream entry content to disk.
pub const COPY_CHUNK_SIZE: usize = 8 * 1024;

/// Caps applied to a single archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractLimits {
    pub max_entries: u64,
    pub max_total_bytes: u64,
}

impl Default for ExtractLimits {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            max_total_bytes: 1024 * 1024 * 1024,
        }
    }
}

impl ExtractLimits {
    pub fn unlimited() -> Self {
        Self {
            max_entries: u64::MAX,
            max_total_bytes: u64::MAX,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    pub entries: u64,
    pub directories: u64,
    pub files: u64,
    pub bytes_written: u64,
}

/// Why an entry name was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Absolute,
    Escapes,
    Root,
}

impl Rejection {
    fn reason(self) -> &'static str {
        match self {
            Rejection::Absolute => "is an absolute path",
            Rejection::Escapes => "escapes the workspace root",
            Rejection::Root => "resolves to the workspace root",
        }
    }
}

/// Resolve a raw entry name below `root`.
///
/// `.` segments are dropped and `..` segments pop the previous segment. A
/// `..` with nothing left to pop escapes the root and is rejected even if
/// later segments would lead back inside. Backslashes are treated as
/// separators. Names that resolve to the root itself (`""`, `.`, `a/..`)
/// are rejected as well; the result is always a strict descendant of `root`.
pub fn resolve_entry_path(root: &Path, name: &str) -> Result<PathBuf, Rejection> {
    let normalized = name.replace('\\', "/");
    let mut segments: Vec<&std::ffi::OsStr> = Vec::new();

    for component in Path::new(&normalized).components() {
        match component {
            Component::Prefix(_) | Component::RootDir => return Err(Rejection::Absolute),
            Component::CurDir => {}
            Component::ParentDir => {
                if segments.pop().is_none() {
                    return Err(Rejection::Escapes);
                }
            }
            Component::Normal(part) => segments.push(part),
        }
    }

    if segments.is_empty() {
        return Err(Rejection::Root);
    }

    let mut resolved = root.to_path_buf();
    resolved.extend(segments);
    Ok(resolved)
}

/// Spool the upload stream `reader` to the workspace's spool file, then
/// unpack it with [`extract`].
#[instrument(skip(reader, workspace), fields(workspace = %workspace.token()))]
pub fn extract_upload<R: Read>(
    mut reader: R,
    workspace: &Workspace,
    limits: &ExtractLimits,
) -> Result<ExtractSummary> {
    let spool_path = workspace.spool_path();
    let mut buffer = vec![0u8; COPY_CHUNK_SIZE];

    let spooled = copy_entry(&mut reader, spool_path, &mut buffer, u64::MAX).map_err(|err| {
        match err {
            CopyError::Read(err) => BuildError::MalformedArchive {
                message: format!("upload interrupted: {}", err),
            },
            CopyError::Write(err) => BuildError::Resource {
                path: spool_path.to_path_buf(),
                source: err,
            },
            CopyError::TooLarge => BuildError::LimitExceeded {
                limit: "upload size",
                max: u64::MAX,
            },
        }
    })?;
    debug!(bytes = spooled, "spooled upload to {}", spool_path.display());

    let archive = File::open(spool_path).map_err(|source| BuildError::Resource {
        path: spool_path.to_path_buf(),
        source,
    })?;
    extract(archive, workspace, limits)
}

/// Unpack every entry of the ZIP archive `reader` into `workspace`.
#[instrument(skip(reader, workspace), fields(workspace = %workspace.token()))]
pub fn extract<R: Read + Seek>(
    reader: R,
    workspace: &Workspace,
    limits: &ExtractLimits,
) -> Result<ExtractSummary> {
    let root = workspace.root();
    let mut summary = ExtractSummary::default();
    let mut buffer = vec![0u8; COPY_CHUNK_SIZE];

    let mut archive = ZipArchive::new(reader).map_err(|err| malformed(&summary, err))?;
    if archive.len() as u64 > limits.max_entries {
        return Err(BuildError::LimitExceeded {
            limit: "entry count",
            max: limits.max_entries,
        });
    }

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|err| malformed(&summary, err))?;
        summary.entries += 1;

        let name = entry.name().to_owned();
        debug!("process entry: {}", name);

        let path = match resolve_entry_path(root, &name) {
            Ok(path) => path,
            Err(rejection) => {
                warn!(entry = %name, "rejecting archive entry: {}", rejection.reason());
                return Err(BuildError::Security {
                    entry: name,
                    reason: rejection.reason(),
                });
            }
        };

        if entry.is_dir() {
            debug!("create directory: {}", path.display());
            fs::create_dir_all(&path).map_err(|err| BuildError::io(&name, err))?;
            summary.directories += 1;
            continue;
        }

        let remaining = limits.max_total_bytes - summary.bytes_written;
        if entry.size() > remaining {
            return Err(BuildError::LimitExceeded {
                limit: "total size",
                max: limits.max_total_bytes,
            });
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| BuildError::io(&name, err))?;
        }

        debug!("create file: {}", path.display());
        let written = copy_entry(&mut entry, &path, &mut buffer, remaining)
            .map_err(|err| match err {
                CopyError::Read(err) | CopyError::Write(err) => BuildError::io(&name, err),
                CopyError::TooLarge => BuildError::LimitExceeded {
                    limit: "total size",
                    max: limits.max_total_bytes,
                },
            })?;

        summary.files += 1;
        summary.bytes_written += written;
    }

    info!(
        entries = summary.entries,
        files = summary.files,
        directories = summary.directories,
        bytes = summary.bytes_written,
        "extracted archive into {}",
        root.display()
    );

    Ok(summary)
}

fn malformed(summary: &ExtractSummary, err: ZipError) -> BuildError {
    BuildError::MalformedArchive {
        message: format!("after {} entries: {}", summary.entries, err),
    }
}

enum CopyError {
    Read(io::Error),
    Write(io::Error),
    TooLarge,
}

/// Stream `source` into a new file at `path`, chunk by chunk.
///
/// The declared entry size is not trusted; the byte budget is enforced on
/// what is actually decompressed.
fn copy_entry<R: Read>(
    source: &mut R,
    path: &Path,
    buffer: &mut [u8],
    budget: u64,
) -> Result<u64, CopyError> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .map_err(CopyError::Write)?;

    let mut written: u64 = 0;
    loop {
        let len = match source.read(buffer) {
            Ok(0) => break,
            Ok(len) => len,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(CopyError::Read(err)),
        };

        written += len as u64;
        if written > budget {
            return Err(CopyError::TooLarge);
        }
        file.write_all(&buffer[..len]).map_err(CopyError::Write)?;
    }

    file.flush().map_err(CopyError::Write)?;
    Ok(written)
}

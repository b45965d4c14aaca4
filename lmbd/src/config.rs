use build_context::ExtractLimits;
use clap::Parser;
use std::path::PathBuf;

pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 256 * 1024 * 1024;

/// Process configuration; every flag can also be set through its env var.
#[derive(Debug, Clone, Parser)]
#[command(name = "lmbd", version, about = "Build container images from uploaded ZIP contexts")]
pub struct Config {
    /// Address the HTTP server listens on
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8080")]
    pub bind_addr: String,

    /// Directory under which per-request workspaces are created [default: system temp dir]
    #[arg(long, env = "LMBD_WORKSPACE_DIR")]
    pub workspace_dir: Option<PathBuf>,

    /// Container engine CLI binary
    #[arg(long, env = "LMBD_ENGINE_BIN", default_value = "docker")]
    pub engine_bin: String,

    /// Engine daemon endpoint; empty uses the CLI's own default
    #[arg(long, env = "LMBD_ENGINE_HOST", default_value = "tcp://localhost:2375")]
    pub engine_host: String,

    /// Maximum number of entries accepted in one archive
    #[arg(long, env = "LMBD_MAX_ENTRIES", default_value_t = 10_000)]
    pub max_entries: u64,

    /// Maximum total uncompressed bytes written per archive
    #[arg(long, env = "LMBD_MAX_TOTAL_BYTES", default_value_t = 1024 * 1024 * 1024)]
    pub max_total_bytes: u64,

    /// Maximum accepted request body size
    #[arg(long, env = "LMBD_MAX_UPLOAD_BYTES", default_value_t = DEFAULT_MAX_UPLOAD_BYTES)]
    pub max_upload_bytes: usize,
}

impl Config {
    pub fn workspace_dir(&self) -> PathBuf {
        self.workspace_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    pub fn limits(&self) -> ExtractLimits {
        ExtractLimits {
            max_entries: self.max_entries,
            max_total_bytes: self.max_total_bytes,
        }
    }
}

//! # Build Context
//!
//! Turns an untrusted ZIP upload into a build context on disk: a private
//! workspace directory ([`workspace`]), an extractor that refuses
//! entries escaping it ([`extract`]), and a check for the build descriptor
//! at its root ([`descriptor`]).
//!
//! ```no_run
//! use build_context::{descriptor, extract, ExtractLimits, WorkspaceManager};
//!
//! # fn main() -> Result<(), build_context::BuildError> {
//! let manager = WorkspaceManager::from_temp_dir();
//! let workspace = manager.acquire()?;
//! let archive = std::fs::File::open("context.zip")
//!     .map_err(|err| build_context::BuildError::io("context.zip", err))?;
//! extract::extract(archive, &workspace, &ExtractLimits::default())?;
//! let dockerfile = descriptor::locate(&workspace)?;
//! println!("{}", dockerfile.display());
//! // Dropping `workspace` removes the directory.
//! # Ok(())
//! # }
//! ```

pub mod descriptor;
pub mod error;
pub mod extract;
pub mod workspace;

pub use descriptor::DESCRIPTOR_FILE_NAME;
pub use error::{BuildError, Result};
pub use extract::{ExtractLimits, ExtractSummary};
pub use workspace::{Workspace, WorkspaceManager, WorkspaceState};

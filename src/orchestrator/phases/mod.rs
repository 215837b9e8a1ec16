//! Orchestrator phases: the build pipeline stages.
//!
//! - **Gate** (`gate`) - required tools resolve on the search path
//! - **Regenerate** (`regen`) - generated build scripts brought up to date
//! - **Configure** (`configure`) - external configure step and stamp
//! - **Build** (`build`) - compile, install, clean
//! - **Assemble** (`image`) - firmware blob from the module manifest
//!
//! Each phase is a plain function over `ForgeContext` and a `CommandRunner`,
//! independently testable with a scripted runner.

pub mod build;
pub mod configure;
pub mod gate;
pub mod image;
pub mod regen;

pub use build::{build, clean, install, CleanReport};
pub use configure::{configure, derive_configuration, verify_stamp, ConfigureOutcome};
pub use gate::{DependencyGate, GateReport, HOST_TOOLS};
pub use image::{assemble, ImageOutcome};
pub use regen::{regenerate, RegenerationReport};

use crate::error::BuildError;
use crate::orchestrator::CancelToken;
use std::path::{Path, PathBuf};

pub(crate) fn ensure_not_cancelled(cancel: &CancelToken) -> Result<(), BuildError> {
    if cancel.is_cancelled() {
        log::warn!("[Build] [CANCEL] Stopping before the next step");
        return Err(BuildError::Cancelled);
    }
    Ok(())
}

/// `./script` style programs are resolved against the directory they run in.
pub(crate) fn resolve_program(program: &str, cwd: &Path) -> String {
    if program.starts_with("./") || program.starts_with("../") {
        cwd.join(program).to_string_lossy().into_owned()
    } else {
        program.to_string()
    }
}

pub(crate) fn remove_path(path: &Path) -> Result<bool, std::io::Error> {
    if path.is_dir() {
        std::fs::remove_dir_all(path)?;
        Ok(true)
    } else if path.exists() {
        std::fs::remove_file(path)?;
        Ok(true)
    } else {
        Ok(false)
    }
}

pub(crate) fn ensure_parent(path: &Path) -> Result<Option<PathBuf>, std::io::Error> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            std::fs::create_dir_all(parent)?;
            Ok(Some(parent.to_path_buf()))
        }
        _ => Ok(None),
    }
}

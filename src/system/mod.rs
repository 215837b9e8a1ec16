/// System module: typed command execution, privilege boundary, workspace paths

pub mod command;
pub mod paths;
pub mod privilege;

use crate::error::BuildError;
use std::path::PathBuf;

/// Log a stage boundary or outcome; also copied to the milestones log.
#[macro_export]
macro_rules! log_milestone {
    ($($arg:tt)*) => {{
        let msg = format!($($arg)*);
        $crate::log::info!(target: $crate::log_collector::MILESTONE_TARGET, "{}", msg);
    }}
}

/// Resolve a tool on the search path.
pub fn resolve_tool(name: &str) -> Result<PathBuf, BuildError> {
    which::which(name).map_err(|_| BuildError::MissingDependency(name.to_string()))
}

/// Resolve a tool against an explicit search path instead of `$PATH`.
pub fn resolve_tool_in(name: &str, search_path: &std::ffi::OsStr) -> Result<PathBuf, BuildError> {
    let cwd = std::env::current_dir()?;
    which::which_in(name, Some(search_path), cwd)
        .map_err(|_| BuildError::MissingDependency(name.to_string()))
}

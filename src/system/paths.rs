//! Workspace path registry.
//!
//! Every persisted artifact lives at a fixed location relative to the
//! workspace root. The root is either given explicitly or found by walking
//! upward from the current directory to the first `forge.toml`.

use crate::config::PathsConfig;
use crate::error::ConfigError;
use std::path::{Path, PathBuf};

/// Marker file identifying a workspace root.
pub const WORKSPACE_ANCHOR: &str = "forge.toml";

/// Name of the configuration stamp inside the state directory.
pub const CONFIG_STAMP: &str = "configuration.json";

/// Absolute locations of every workspace artifact.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkspacePaths {
    pub root: PathBuf,
    pub source_dir: PathBuf,
    pub install_dir: PathBuf,
    pub firmware_blob: PathBuf,
    pub disk_image: PathBuf,
    pub boot_image: PathBuf,
    pub scratch_mount: PathBuf,
    pub boot_menu: PathBuf,
    pub state_dir: PathBuf,
    pub log_dir: PathBuf,
}

impl WorkspacePaths {
    /// Resolve configured locations against a workspace root.
    ///
    /// The root must exist; it is canonicalized so logged paths are absolute.
    /// The source and install trees are also checked for characters that
    /// autotools cannot quote (whitespace and `:`).
    pub fn new(root: &Path, paths: &PathsConfig) -> Result<Self, ConfigError> {
        let root = root.canonicalize().map_err(|e| {
            ConfigError::ValidationFailed(format!(
                "Workspace root {} is not accessible: {}",
                root.display(),
                e
            ))
        })?;

        let resolved = WorkspacePaths {
            source_dir: root.join(&paths.source_dir),
            install_dir: root.join(&paths.install_dir),
            firmware_blob: root.join(&paths.firmware_blob),
            disk_image: root.join(&paths.disk_image),
            boot_image: root.join(&paths.boot_image),
            scratch_mount: root.join(&paths.scratch_mount),
            boot_menu: root.join(&paths.boot_menu),
            state_dir: root.join(&paths.state_dir),
            log_dir: root.join(&paths.log_dir),
            root,
        };

        validate_build_path(&resolved.source_dir)?;
        validate_build_path(&resolved.install_dir)?;
        Ok(resolved)
    }

    /// Recorded configuration of the last successful configure run.
    pub fn config_stamp(&self) -> PathBuf {
        self.state_dir.join(CONFIG_STAMP)
    }

    /// Build-script makefile produced by configure.
    pub fn makefile(&self) -> PathBuf {
        self.source_dir.join("Makefile")
    }

    pub fn configure_script(&self) -> PathBuf {
        self.source_dir.join("configure")
    }

    pub fn resolve_relative(&self, relative_path: &Path) -> PathBuf {
        self.root.join(relative_path)
    }
}

/// Walk upward from `start` to the directory holding `forge.toml`.
///
/// Falls back to `start` itself so a fresh checkout works with built-in
/// defaults.
pub fn find_workspace_root(start: &Path) -> PathBuf {
    let mut current = start.to_path_buf();
    loop {
        if current.join(WORKSPACE_ANCHOR).is_file() {
            log::debug!("[Paths] Workspace anchor found at {}", current.display());
            return current;
        }
        match current.parent() {
            Some(parent) if parent != current => current = parent.to_path_buf(),
            _ => break,
        }
    }
    log::debug!(
        "[Paths] No {} above {}; using it as workspace root",
        WORKSPACE_ANCHOR,
        start.display()
    );
    start.to_path_buf()
}

fn validate_build_path(path: &Path) -> Result<(), ConfigError> {
    let text = path.to_str().ok_or_else(|| {
        ConfigError::ValidationFailed(format!("Path is not valid UTF-8: {}", path.display()))
    })?;
    if text.chars().any(|c| c.is_whitespace() || c == ':') {
        return Err(ConfigError::ValidationFailed(format!(
            "Path contains whitespace or ':' which configure cannot handle: {}",
            text
        )));
    }
    Ok(())
}

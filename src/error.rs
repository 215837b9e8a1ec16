//! Unified error type hierarchy for bootforge
//!
//! Provides structured error handling with CommandError, ConfigError, ManifestError,
//! BuildError, MediaError, LaunchError, and the top-level ForgeError.

use std::io;
use thiserror::Error;

/// External process invocation errors (spawn, wait, pipe handling).
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to wait for '{program}': {source}")]
    Wait {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to capture output of '{0}'")]
    Pipe(String),
}

/// Configuration file parsing and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Invalid TOML in config: {0}")]
    InvalidToml(#[from] toml::de::Error),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("IO error during config operations: {0}")]
    IoError(#[from] io::Error),
}

/// Module manifest validation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ManifestError {
    #[error("Module manifest is empty")]
    Empty,

    #[error("Invalid module name: '{0}'")]
    InvalidName(String),

    #[error("Duplicate module in manifest: '{0}'")]
    Duplicate(String),
}

/// Build pipeline errors (gate, regeneration, configure, build, image).
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Missing dependency: '{0}' was not found on the search path")]
    MissingDependency(String),

    #[error("Regeneration of build scripts failed: {0}")]
    RegenerationFailed(String),

    #[error("Configuration failed: {0}")]
    ConfigurationFailed(String),

    #[error("Configuration is stale or missing: {0}")]
    StaleConfiguration(String),

    #[error("Build failed: {0}")]
    BuildFailed(String),

    #[error("Install failed: {0}")]
    InstallFailed(String),

    #[error("Image assembly failed: {0}")]
    ImageAssemblyFailed(String),

    #[error("Build cancelled by operator")]
    Cancelled,

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("IO error during build: {0}")]
    Io(#[from] io::Error),
}

/// Virtual media lifecycle errors.
#[derive(Error, Debug)]
pub enum MediaError {
    #[error("Firmware blob not found at {0}; run forge-build --efi first")]
    MissingFirmwareBlob(String),

    #[error("Boot menu configuration not found at {0}")]
    MissingBootMenu(String),

    #[error("Failed to create growable disk: {0}")]
    CreateFailed(String),

    #[error("Failed to format boot image: {0}")]
    FormatFailed(String),

    #[error("Existing media is invalid: {0}; run forge-boot --clean to recreate it")]
    InvalidMedia(String),

    #[error("Mount failed: {0}")]
    MountFailed(String),

    #[error("Failed to populate boot image: {0}")]
    PopulateFailed(String),

    #[error("Unmount failed: {0}")]
    UnmountFailed(String),

    #[error("Privileged operation unavailable: {0}")]
    PrivilegeUnavailable(String),

    #[error("Media staging cancelled by operator")]
    Cancelled,

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("IO error during media staging: {0}")]
    Io(#[from] io::Error),
}

/// Emulator launch errors.
#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("No virtual media found (looked for {flat} and {disk}); run forge-boot --setup first")]
    MissingMedia { flat: String, disk: String },

    #[error("Platform firmware not found at {0}")]
    MissingFirmware(String),

    #[error("Failed to exec emulator '{program}': {source}")]
    ExecFailed {
        program: String,
        #[source]
        source: io::Error,
    },
}

/// Top-level error for both orchestrators.
///
/// Carries the process exit code so the binaries report a distinct nonzero
/// status per failure class.
#[derive(Error, Debug)]
pub enum ForgeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error(transparent)]
    Launch(#[from] LaunchError),
}

impl ForgeError {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            ForgeError::Build(BuildError::MissingDependency(_)) => 3,
            ForgeError::Build(BuildError::ConfigurationFailed(_))
            | ForgeError::Build(BuildError::StaleConfiguration(_))
            | ForgeError::Config(_) => 4,
            ForgeError::Build(BuildError::BuildFailed(_)) => 5,
            ForgeError::Media(MediaError::MountFailed(_))
            | ForgeError::Media(MediaError::UnmountFailed(_)) => 6,
            ForgeError::Launch(LaunchError::MissingMedia { .. }) => 7,
            _ => 1,
        }
    }
}

/// Top-level result type for orchestrator entry points.
pub type Result<T> = std::result::Result<T, ForgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_dependency_display() {
        let err = BuildError::MissingDependency("autoconf".to_string());
        assert_eq!(
            err.to_string(),
            "Missing dependency: 'autoconf' was not found on the search path"
        );
    }

    #[test]
    fn test_missing_media_mentions_setup() {
        let err = LaunchError::MissingMedia {
            flat: "out/boot.img".to_string(),
            disk: "out/disk.qcow2".to_string(),
        };
        assert!(err.to_string().contains("--setup"));
    }

    #[test]
    fn test_exit_codes_are_distinct_and_nonzero() {
        let codes = [
            ForgeError::from(BuildError::MissingDependency("make".into())).exit_code(),
            ForgeError::from(BuildError::ConfigurationFailed("x".into())).exit_code(),
            ForgeError::from(BuildError::BuildFailed("x".into())).exit_code(),
            ForgeError::from(MediaError::MountFailed("x".into())).exit_code(),
            ForgeError::from(LaunchError::MissingMedia {
                flat: String::new(),
                disk: String::new(),
            })
            .exit_code(),
        ];
        assert_eq!(codes, [3, 4, 5, 6, 7]);
        assert_eq!(ForgeError::from(ManifestError::Empty).exit_code(), 1);
    }

    #[test]
    fn test_configuration_error_carries_diagnostic_verbatim() {
        let diag = "configure: error: C compiler cannot create executables";
        let err = BuildError::ConfigurationFailed(diag.to_string());
        assert!(err.to_string().ends_with(diag));
    }
}

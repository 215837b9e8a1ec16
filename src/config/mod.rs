//! Configuration management for bootforge.
//!
//! `ForgeConfig` is the single immutable value threaded through every stage.
//! It replaces process-wide environment variables: compiler and flag
//! selection live in `toolchain` and reach the external tools as explicit
//! per-invocation environment.

pub mod loader;

use crate::error::{ConfigError, ForgeError};
use crate::models::{is_valid_triple, Compression, ModuleManifest, TargetArch, ToolchainSpec};
use crate::system::paths::WorkspacePaths;
use crate::system::privilege::PrivilegeBoundary;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub use loader::{load_config_from_file, resolve_config, save_config_to_file};

/// Smallest image mkfs.fat will format as FAT32 with 512-byte clusters.
pub const MIN_BOOT_IMAGE_MIB: u64 = 33;

static DISK_SIZE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[1-9][0-9]*[KMGT]?$").expect("disk size pattern is a valid regex"));

/// Fixed relative locations of persisted state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
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

impl Default for PathsConfig {
    fn default() -> Self {
        PathsConfig {
            source_dir: PathBuf::from("grub"),
            install_dir: PathBuf::from("install"),
            firmware_blob: PathBuf::from("out/grub.efi"),
            disk_image: PathBuf::from("out/disk.qcow2"),
            boot_image: PathBuf::from("out/boot.img"),
            scratch_mount: PathBuf::from("out/mnt"),
            boot_menu: PathBuf::from("config/grub.cfg"),
            state_dir: PathBuf::from(".forge"),
            log_dir: PathBuf::from("logs"),
        }
    }
}

/// Policy for the external configure step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigureConfig {
    pub platform: String,
    /// Subsystems passed as `--disable-<name>`.
    pub disabled_features: Vec<String>,
}

impl Default for ConfigureConfig {
    fn default() -> Self {
        ConfigureConfig {
            platform: "efi".to_string(),
            disabled_features: [
                "werror",
                "grub-mkfont",
                "grub-themes",
                "grub-mount",
                "device-mapper",
                "libzfs",
                "nls",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BuildSettings {
    /// Parallel jobs for make; 0 means one per processing unit.
    pub jobs: usize,
}

impl BuildSettings {
    pub fn effective_jobs(&self) -> usize {
        if self.jobs == 0 {
            num_cpus::get().max(1)
        } else {
            self.jobs
        }
    }
}

/// A generated build script and the source it is produced from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedPair {
    pub generated: PathBuf,
    pub source: PathBuf,
}

/// Inputs of the regeneration decision, relative to the source tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegenerationConfig {
    pub pairs: Vec<GeneratedPair>,
    /// Primary generation procedure (program followed by arguments).
    pub primary: Vec<String>,
    /// Thorough procedure used when auxiliary files are missing.
    pub thorough: Vec<String>,
    pub auxiliary: Vec<PathBuf>,
    /// Dependency lists that default to empty when absent.
    pub optional_lists: Vec<PathBuf>,
}

impl Default for RegenerationConfig {
    fn default() -> Self {
        RegenerationConfig {
            pairs: vec![GeneratedPair {
                generated: PathBuf::from("configure"),
                source: PathBuf::from("configure.ac"),
            }],
            primary: vec!["./autogen.sh".to_string()],
            thorough: vec!["autoreconf".to_string(), "-vfi".to_string()],
            auxiliary: vec![PathBuf::from("build-aux/config.sub")],
            optional_lists: vec![PathBuf::from("grub-core/extra_deps.lst")],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    /// Overrides the format derived from the target architecture.
    pub format: Option<String>,
    /// Default boot-search prefix baked into the image.
    pub prefix: String,
    pub compression: Compression,
    /// Overrides the default capability-grouped manifest.
    pub modules: Option<Vec<String>>,
}

impl Default for ImageConfig {
    fn default() -> Self {
        ImageConfig {
            format: None,
            prefix: "/EFI/BOOT".to_string(),
            compression: Compression::Xz,
            modules: None,
        }
    }
}

impl ImageConfig {
    pub fn manifest(&self) -> Result<ModuleManifest, crate::error::ManifestError> {
        match self.modules {
            Some(ref modules) => ModuleManifest::new(modules.iter().cloned()),
            None => Ok(ModuleManifest::default()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Virtual size of the growable disk, in qemu-img notation.
    pub disk_size: String,
    pub boot_image_size_mib: u64,
    pub volume_label: String,
    pub privilege: PrivilegeBoundary,
    /// Check reused media before trusting them.
    pub validate_existing: bool,
}

impl Default for MediaConfig {
    fn default() -> Self {
        MediaConfig {
            disk_size: "8G".to_string(),
            boot_image_size_mib: 64,
            volume_label: "EFIBOOT".to_string(),
            privilege: PrivilegeBoundary::Sudo,
            validate_existing: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulatorConfig {
    pub binary: Option<String>,
    pub machine: Option<String>,
    pub cpu: Option<String>,
    pub cores: u32,
    pub memory_mib: u32,
    pub firmware: Option<PathBuf>,
    pub host_port: u16,
    pub guest_port: u16,
    pub extra_args: Vec<String>,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        EmulatorConfig {
            binary: None,
            machine: None,
            cpu: None,
            cores: 4,
            memory_mib: 2048,
            firmware: None,
            host_port: 2222,
            guest_port: 22,
            extra_args: Vec::new(),
        }
    }
}

/// Complete bootforge configuration (`forge.toml`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ForgeConfig {
    pub paths: PathsConfig,
    pub toolchain: ToolchainSpec,
    pub configure: ConfigureConfig,
    pub build: BuildSettings,
    pub regeneration: RegenerationConfig,
    pub image: ImageConfig,
    pub media: MediaConfig,
    pub emulator: EmulatorConfig,
}

impl ForgeConfig {
    /// Target architecture, once the triple is known to be supported.
    pub fn arch(&self) -> Result<TargetArch, ConfigError> {
        self.toolchain.arch().ok_or_else(|| {
            ConfigError::ValidationFailed(format!(
                "Unsupported target architecture in triple '{}'",
                self.toolchain.target
            ))
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, triple) in [("target", &self.toolchain.target), ("host", &self.toolchain.host)] {
            if !is_valid_triple(triple) {
                return Err(ConfigError::ValidationFailed(format!(
                    "Invalid {} triple: '{}'",
                    name, triple
                )));
            }
        }
        self.arch()?;

        if self.toolchain.compiler.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "toolchain.compiler cannot be empty".to_string(),
            ));
        }

        self.image
            .manifest()
            .map_err(|e| ConfigError::ValidationFailed(e.to_string()))?;

        if !self.image.prefix.starts_with('/') {
            return Err(ConfigError::ValidationFailed(format!(
                "image.prefix must be absolute, got '{}'",
                self.image.prefix
            )));
        }

        if self.regeneration.primary.is_empty() || self.regeneration.thorough.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "regeneration.primary and regeneration.thorough must name a program".to_string(),
            ));
        }

        if self.media.boot_image_size_mib < MIN_BOOT_IMAGE_MIB {
            return Err(ConfigError::ValidationFailed(format!(
                "media.boot_image_size_mib must be at least {} for FAT32, got {}",
                MIN_BOOT_IMAGE_MIB, self.media.boot_image_size_mib
            )));
        }

        if !DISK_SIZE.is_match(&self.media.disk_size) {
            return Err(ConfigError::ValidationFailed(format!(
                "media.disk_size '{}' is not a size like 8G",
                self.media.disk_size
            )));
        }

        let label = &self.media.volume_label;
        if label.is_empty() || label.len() > 11 || !label.is_ascii() {
            return Err(ConfigError::ValidationFailed(format!(
                "media.volume_label '{}' must be 1-11 ASCII characters",
                label
            )));
        }

        if self.emulator.cores == 0 || self.emulator.memory_mib < 128 {
            return Err(ConfigError::ValidationFailed(
                "emulator needs at least 1 core and 128 MiB of memory".to_string(),
            ));
        }

        Ok(())
    }
}

/// Validated configuration bound to a workspace.
///
/// Built once per run and shared read-only by every stage.
#[derive(Debug, Clone)]
pub struct ForgeContext {
    pub config: ForgeConfig,
    pub paths: WorkspacePaths,
    pub arch: TargetArch,
    pub manifest: ModuleManifest,
}

impl ForgeContext {
    pub fn new(workspace_root: &Path, config: ForgeConfig) -> Result<Self, ForgeError> {
        config.validate()?;
        let arch = config.arch()?;
        let manifest = config.image.manifest()?;
        let paths = WorkspacePaths::new(workspace_root, &config.paths)?;
        Ok(ForgeContext {
            config,
            paths,
            arch,
            manifest,
        })
    }

    /// Image-maker format, honoring the configured override.
    pub fn image_format(&self) -> &str {
        self.config
            .image
            .format
            .as_deref()
            .unwrap_or_else(|| self.arch.image_format())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = ForgeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.arch().unwrap(), TargetArch::Aarch64);
        assert_eq!(config.toolchain.compiler, "aarch64-linux-gnu-gcc");
        assert_eq!(config.image.prefix, "/EFI/BOOT");
        assert!(config.media.validate_existing);
    }

    #[test]
    fn test_rejects_small_boot_image() {
        let mut config = ForgeConfig::default();
        config.media.boot_image_size_mib = 16;
        assert!(matches!(config.validate(), Err(ConfigError::ValidationFailed(_))));
    }

    #[test]
    fn test_rejects_unsupported_target() {
        let mut config = ForgeConfig::default();
        config.toolchain.target = "mips-linux-gnu".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_duplicate_modules() {
        let mut config = ForgeConfig::default();
        config.image.modules = Some(vec!["fat".to_string(), "fat".to_string()]);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Duplicate module"));
    }

    #[test]
    fn test_rejects_bad_disk_size_and_label() {
        let mut config = ForgeConfig::default();
        config.media.disk_size = "lots".to_string();
        assert!(config.validate().is_err());

        let mut config = ForgeConfig::default();
        config.media.volume_label = "A_VERY_LONG_LABEL".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_effective_jobs() {
        assert_eq!(BuildSettings { jobs: 3 }.effective_jobs(), 3);
        assert!(BuildSettings { jobs: 0 }.effective_jobs() >= 1);
    }

    #[test]
    fn test_context_image_format_override() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = ForgeConfig::default();
        let ctx = ForgeContext::new(temp_dir.path(), config.clone()).unwrap();
        assert_eq!(ctx.image_format(), "arm64-efi");

        config.image.format = Some("arm64-efi-custom".to_string());
        let ctx = ForgeContext::new(temp_dir.path(), config).unwrap();
        assert_eq!(ctx.image_format(), "arm64-efi-custom");
    }
}

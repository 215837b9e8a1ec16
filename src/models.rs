//! Core data types for bootforge.

use crate::error::ManifestError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::SystemTime;

static MODULE_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9_]+$").expect("module name pattern is a valid regex")
});

static TARGET_TRIPLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9_]+(-[a-z0-9_.]+){1,3}$").expect("triple pattern is a valid regex")
});

/// Check a target/host triple such as `aarch64-linux-gnu`.
pub fn is_valid_triple(triple: &str) -> bool {
    TARGET_TRIPLE.is_match(triple)
}

/// Architecture of the cross-built bootloader.
///
/// Everything that differs per architecture (image format, EFI boot filename,
/// emulator binary, machine profile defaults) is derived from here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetArch {
    Aarch64,
    Riscv64,
    X86_64,
}

impl TargetArch {
    /// Parse the architecture from the first component of a triple.
    pub fn from_triple(triple: &str) -> Option<Self> {
        triple.split('-').next().and_then(|arch| arch.parse().ok())
    }

    /// Image-maker output format identifier.
    pub fn image_format(&self) -> &'static str {
        match self {
            TargetArch::Aarch64 => "arm64-efi",
            TargetArch::Riscv64 => "riscv64-efi",
            TargetArch::X86_64 => "x86_64-efi",
        }
    }

    /// Removable-media boot application name defined by UEFI.
    pub fn efi_boot_filename(&self) -> &'static str {
        match self {
            TargetArch::Aarch64 => "BOOTAA64.EFI",
            TargetArch::Riscv64 => "BOOTRISCV64.EFI",
            TargetArch::X86_64 => "BOOTX64.EFI",
        }
    }

    pub fn emulator_binary(&self) -> &'static str {
        match self {
            TargetArch::Aarch64 => "qemu-system-aarch64",
            TargetArch::Riscv64 => "qemu-system-riscv64",
            TargetArch::X86_64 => "qemu-system-x86_64",
        }
    }

    pub fn default_machine(&self) -> &'static str {
        match self {
            TargetArch::Aarch64 | TargetArch::Riscv64 => "virt",
            TargetArch::X86_64 => "q35",
        }
    }

    pub fn default_cpu(&self) -> &'static str {
        match self {
            TargetArch::Aarch64 => "cortex-a57",
            TargetArch::Riscv64 => "rv64",
            TargetArch::X86_64 => "qemu64",
        }
    }

    /// Where distributions ship the EDK2 build for this architecture.
    pub fn default_firmware(&self) -> &'static str {
        match self {
            TargetArch::Aarch64 => "/usr/share/qemu-efi-aarch64/QEMU_EFI.fd",
            TargetArch::Riscv64 => "/usr/share/qemu-efi-riscv64/RISCV_VIRT_CODE.fd",
            TargetArch::X86_64 => "/usr/share/ovmf/OVMF.fd",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TargetArch::Aarch64 => "aarch64",
            TargetArch::Riscv64 => "riscv64",
            TargetArch::X86_64 => "x86_64",
        }
    }
}

impl fmt::Display for TargetArch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetArch {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "aarch64" | "arm64" => Ok(TargetArch::Aarch64),
            "riscv64" => Ok(TargetArch::Riscv64),
            "x86_64" | "amd64" => Ok(TargetArch::X86_64),
            _ => Err(format!("Unsupported target architecture: {}", s)),
        }
    }
}

/// Cross toolchain selection. Immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolchainSpec {
    pub target: String,
    pub host: String,
    pub compiler: String,
    pub cflags: Vec<String>,
    pub ldflags: Vec<String>,
}

impl ToolchainSpec {
    pub fn arch(&self) -> Option<TargetArch> {
        TargetArch::from_triple(&self.target)
    }
}

impl Default for ToolchainSpec {
    fn default() -> Self {
        let target = "aarch64-linux-gnu".to_string();
        ToolchainSpec {
            compiler: format!("{}-gcc", target),
            target,
            host: format!("{}-linux-gnu", std::env::consts::ARCH),
            cflags: vec!["-Os".to_string()],
            ldflags: Vec::new(),
        }
    }
}

/// Configuration handed to the external configure step and persisted as the
/// configuration stamp once that step succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildConfiguration {
    pub toolchain: ToolchainSpec,
    pub platform: String,
    pub prefix: PathBuf,
    pub disabled_features: Vec<String>,
}

impl BuildConfiguration {
    pub fn derive(
        toolchain: &ToolchainSpec,
        platform: &str,
        prefix: &Path,
        disabled_features: &[String],
    ) -> Self {
        BuildConfiguration {
            toolchain: toolchain.clone(),
            platform: platform.to_string(),
            prefix: prefix.to_path_buf(),
            disabled_features: disabled_features.to_vec(),
        }
    }

    /// Arguments passed to `configure`, in a stable order.
    pub fn configure_args(&self) -> Vec<String> {
        let mut args = vec![
            format!("--target={}", self.toolchain.target),
            format!("--host={}", self.toolchain.host),
            format!("--with-platform={}", self.platform),
            format!("--prefix={}", self.prefix.display()),
        ];
        args.extend(
            self.disabled_features
                .iter()
                .map(|feature| format!("--disable-{}", feature)),
        );
        args
    }

    /// Per-invocation environment carrying the compiler selection.
    pub fn configure_env(&self) -> Vec<(String, String)> {
        vec![
            ("TARGET_CC".to_string(), self.toolchain.compiler.clone()),
            ("TARGET_CFLAGS".to_string(), self.toolchain.cflags.join(" ")),
            ("TARGET_LDFLAGS".to_string(), self.toolchain.ldflags.join(" ")),
        ]
    }
}

/// Capability group a module belongs to in the default manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleGroup {
    Partition,
    Filesystem,
    RuntimeCore,
    Terminal,
    Utility,
}

impl ModuleGroup {
    pub fn default_modules(&self) -> &'static [&'static str] {
        match self {
            ModuleGroup::Partition => &["part_gpt", "part_msdos"],
            ModuleGroup::Filesystem => &["fat", "ext2", "iso9660"],
            ModuleGroup::RuntimeCore => &[
                "normal",
                "boot",
                "configfile",
                "linux",
                "search",
                "search_fs_uuid",
                "search_fs_file",
                "search_label",
            ],
            ModuleGroup::Terminal => &["efi_gop", "gfxterm", "font", "terminal"],
            ModuleGroup::Utility => &["echo", "test", "ls", "cat", "reboot", "halt"],
        }
    }

    pub fn all() -> [ModuleGroup; 5] {
        [
            ModuleGroup::Partition,
            ModuleGroup::Filesystem,
            ModuleGroup::RuntimeCore,
            ModuleGroup::Terminal,
            ModuleGroup::Utility,
        ]
    }
}

/// Ordered, duplicate-free list of modules embedded into the firmware blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleManifest {
    modules: Vec<String>,
}

impl ModuleManifest {
    pub fn new<I, S>(modules: I) -> Result<Self, ManifestError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let modules: Vec<String> = modules.into_iter().map(Into::into).collect();
        if modules.is_empty() {
            return Err(ManifestError::Empty);
        }

        let mut seen = HashSet::new();
        for name in &modules {
            if !MODULE_NAME.is_match(name) {
                return Err(ManifestError::InvalidName(name.clone()));
            }
            if !seen.insert(name.as_str()) {
                return Err(ManifestError::Duplicate(name.clone()));
            }
        }

        Ok(ModuleManifest { modules })
    }

    pub fn modules(&self) -> &[String] {
        &self.modules
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

impl Default for ModuleManifest {
    fn default() -> Self {
        let modules = ModuleGroup::all()
            .iter()
            .flat_map(|group| group.default_modules().iter().copied())
            .map(String::from)
            .collect();
        ModuleManifest { modules }
    }
}

/// Freshness of a generated file relative to its declared source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactState {
    Absent,
    Stale,
    Fresh,
}

impl ArtifactState {
    /// Classify `generated` against `source` by modification time.
    ///
    /// Equal mtimes count as fresh. A missing source cannot make the
    /// generated file stale.
    pub fn of(generated: &Path, source: &Path) -> ArtifactState {
        let generated_mtime = match modified(generated) {
            Some(t) => t,
            None => return ArtifactState::Absent,
        };
        match modified(source) {
            Some(source_mtime) if generated_mtime < source_mtime => ArtifactState::Stale,
            _ => ArtifactState::Fresh,
        }
    }

    pub fn needs_regeneration(&self) -> bool {
        !matches!(self, ArtifactState::Fresh)
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Kind of virtual block media.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaKind {
    /// qcow2 disk that grows on demand.
    GrowableDisk,
    /// Fixed-size raw image holding a FAT32 filesystem.
    FlatBootImage,
}

impl MediaKind {
    /// Drive format passed to the emulator.
    pub fn drive_format(&self) -> &'static str {
        match self {
            MediaKind::GrowableDisk => "qcow2",
            MediaKind::FlatBootImage => "raw",
        }
    }
}

/// A virtual media artifact on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualMedia {
    pub kind: MediaKind,
    pub path: PathBuf,
}

impl VirtualMedia {
    pub fn new(kind: MediaKind, path: impl Into<PathBuf>) -> Self {
        VirtualMedia {
            kind,
            path: path.into(),
        }
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }
}

/// Compression applied by the image-maker to the embedded modules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    Auto,
    None,
    #[default]
    Xz,
}

impl Compression {
    pub fn as_arg(&self) -> &'static str {
        match self {
            Compression::Auto => "auto",
            Compression::None => "none",
            Compression::Xz => "xz",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::time::Duration;
    use tempfile::TempDir;

    fn toolchain() -> ToolchainSpec {
        ToolchainSpec {
            target: "aarch64-linux-gnu".to_string(),
            host: "x86_64-linux-gnu".to_string(),
            compiler: "aarch64-linux-gnu-gcc".to_string(),
            cflags: vec!["-Os".to_string()],
            ldflags: vec![],
        }
    }

    #[test]
    fn test_target_arch_from_triple() {
        assert_eq!(TargetArch::from_triple("aarch64-linux-gnu"), Some(TargetArch::Aarch64));
        assert_eq!(TargetArch::from_triple("riscv64-unknown-elf"), Some(TargetArch::Riscv64));
        assert_eq!(TargetArch::from_triple("x86_64-pc-linux-gnu"), Some(TargetArch::X86_64));
        assert_eq!(TargetArch::from_triple("mips-linux-gnu"), None);
    }

    #[test]
    fn test_aarch64_profile_strings() {
        let arch = TargetArch::Aarch64;
        assert_eq!(arch.image_format(), "arm64-efi");
        assert_eq!(arch.efi_boot_filename(), "BOOTAA64.EFI");
        assert_eq!(arch.emulator_binary(), "qemu-system-aarch64");
    }

    #[test]
    fn test_triple_validation() {
        assert!(is_valid_triple("aarch64-linux-gnu"));
        assert!(is_valid_triple("x86_64-pc-linux-gnu"));
        assert!(!is_valid_triple("aarch64"));
        assert!(!is_valid_triple("aarch64-linux-gnu; rm -rf /"));
    }

    #[test]
    fn test_configure_args_include_policy_disables_in_order() {
        let cfg = BuildConfiguration::derive(
            &toolchain(),
            "efi",
            Path::new("/work/install"),
            &["werror".to_string(), "nls".to_string()],
        );
        assert_eq!(
            cfg.configure_args(),
            vec![
                "--target=aarch64-linux-gnu",
                "--host=x86_64-linux-gnu",
                "--with-platform=efi",
                "--prefix=/work/install",
                "--disable-werror",
                "--disable-nls",
            ]
        );
        assert!(cfg
            .configure_env()
            .contains(&("TARGET_CC".to_string(), "aarch64-linux-gnu-gcc".to_string())));
    }

    #[test]
    fn test_manifest_rejects_duplicates() {
        let err = ModuleManifest::new(["fat", "normal", "fat"]).unwrap_err();
        assert_eq!(err, ManifestError::Duplicate("fat".to_string()));
    }

    #[test]
    fn test_manifest_rejects_bad_names_and_empty() {
        assert_eq!(
            ModuleManifest::new(["fat", "-o evil"]).unwrap_err(),
            ManifestError::InvalidName("-o evil".to_string())
        );
        assert_eq!(
            ModuleManifest::new(Vec::<String>::new()).unwrap_err(),
            ManifestError::Empty
        );
    }

    #[test]
    fn test_manifest_preserves_order() {
        let manifest = ModuleManifest::new(["normal", "fat", "part_gpt"]).unwrap();
        assert_eq!(manifest.modules(), &["normal", "fat", "part_gpt"]);
    }

    #[test]
    fn test_default_manifest_is_valid_and_grouped() {
        let manifest = ModuleManifest::default();
        let revalidated = ModuleManifest::new(manifest.modules().to_vec()).unwrap();
        assert_eq!(revalidated, manifest);
        assert_eq!(manifest.modules()[0], "part_gpt");
        assert!(manifest.modules().contains(&"normal".to_string()));
    }

    #[test]
    fn test_artifact_state_transitions() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("configure.ac");
        let generated = temp_dir.path().join("configure");

        File::create(&source).unwrap();
        assert_eq!(ArtifactState::of(&generated, &source), ArtifactState::Absent);

        let now = SystemTime::now();
        let gen_file = File::create(&generated).unwrap();
        gen_file.set_modified(now - Duration::from_secs(60)).unwrap();
        File::options()
            .write(true)
            .open(&source)
            .unwrap()
            .set_modified(now)
            .unwrap();
        assert_eq!(ArtifactState::of(&generated, &source), ArtifactState::Stale);

        gen_file.set_modified(now + Duration::from_secs(60)).unwrap();
        assert_eq!(ArtifactState::of(&generated, &source), ArtifactState::Fresh);
    }

    #[test]
    fn test_artifact_fresh_when_source_missing() {
        let temp_dir = TempDir::new().unwrap();
        let generated = temp_dir.path().join("configure");
        File::create(&generated).unwrap();
        assert_eq!(
            ArtifactState::of(&generated, &temp_dir.path().join("missing.ac")),
            ArtifactState::Fresh
        );
    }

    #[test]
    fn test_media_drive_formats() {
        assert_eq!(MediaKind::FlatBootImage.drive_format(), "raw");
        assert_eq!(MediaKind::GrowableDisk.drive_format(), "qcow2");
    }
}

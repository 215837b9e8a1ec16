//! Config file loader and serialization.

use crate::config::ForgeConfig;
use crate::error::ConfigError;
use crate::system::paths::WORKSPACE_ANCHOR;
use std::fs;
use std::path::{Path, PathBuf};

/// Global fallback: ~/.config/bootforge/forge.toml
pub fn get_global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("bootforge").join(WORKSPACE_ANCHOR))
}

/// Load config from a TOML file.
pub fn load_config_from_file(path: &Path) -> Result<ForgeConfig, ConfigError> {
    validate_config_path(path)?;

    let content = fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConfigError::FileNotFound(format!(
                "Configuration file not found at: {}",
                path.display()
            ))
        } else {
            ConfigError::IoError(e)
        }
    })?;

    let config: ForgeConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Save config to a TOML file.
pub fn save_config_to_file(config: &ForgeConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let content = toml::to_string_pretty(config)
        .map_err(|e| ConfigError::ValidationFailed(format!("Cannot serialize config: {}", e)))?;
    fs::write(path, content)?;
    Ok(())
}

/// Pick the configuration for a run.
///
/// Order: the explicit `--config` path (must exist), `<workspace>/forge.toml`,
/// the global file, then built-in defaults. Returns the file used, if any.
pub fn resolve_config(
    explicit: Option<&Path>,
    workspace_root: &Path,
) -> Result<(ForgeConfig, Option<PathBuf>), ConfigError> {
    if let Some(path) = explicit {
        let config = load_config_from_file(path)?;
        return Ok((config, Some(path.to_path_buf())));
    }

    let candidates = std::iter::once(workspace_root.join(WORKSPACE_ANCHOR))
        .chain(get_global_config_path());
    for candidate in candidates {
        if candidate.is_file() {
            log::debug!("[Config] Loading {}", candidate.display());
            let config = load_config_from_file(&candidate)?;
            return Ok((config, Some(candidate)));
        }
    }

    log::debug!("[Config] No forge.toml found; using defaults");
    Ok((ForgeConfig::default(), None))
}

/// Validate config path (.toml extension required).
pub fn validate_config_path(path: &Path) -> Result<(), ConfigError> {
    if path.as_os_str().is_empty() {
        return Err(ConfigError::ValidationFailed(
            "Configuration path cannot be empty".to_string(),
        ));
    }

    match path.extension() {
        Some(ext) if ext == "toml" => Ok(()),
        Some(ext) => Err(ConfigError::ValidationFailed(format!(
            "Configuration file must have .toml extension, got .{}",
            ext.to_string_lossy()
        ))),
        None => Err(ConfigError::ValidationFailed(
            "Configuration file must have .toml extension".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::privilege::PrivilegeBoundary;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_load_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("forge.toml");

        let mut original = ForgeConfig::default();
        original.toolchain.target = "riscv64-linux-gnu".to_string();
        original.toolchain.compiler = "riscv64-linux-gnu-gcc".to_string();
        original.build.jobs = 6;
        original.media.privilege = PrivilegeBoundary::Mtools;
        original.image.modules = Some(vec!["fat".to_string(), "normal".to_string()]);

        save_config_to_file(&original, &config_path).expect("Failed to save config");
        let loaded = load_config_from_file(&config_path).expect("Failed to load config");
        assert_eq!(loaded, original);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("forge.toml");
        fs::write(
            &config_path,
            "[media]\nprivilege = \"pkexec\"\n\n[emulator]\nmemory_mib = 4096\n",
        )
        .unwrap();

        let loaded = load_config_from_file(&config_path).unwrap();
        assert_eq!(loaded.media.privilege, PrivilegeBoundary::Pkexec);
        assert_eq!(loaded.media.boot_image_size_mib, 64);
        assert_eq!(loaded.emulator.memory_mib, 4096);
        assert_eq!(loaded.emulator.cores, 4);
        assert_eq!(loaded.paths, crate::config::PathsConfig::default());
    }

    #[test]
    fn test_validate_config_path() {
        assert!(validate_config_path(Path::new("forge.toml")).is_ok());
        assert!(validate_config_path(Path::new("forge.json")).is_err());
        assert!(validate_config_path(Path::new("forge")).is_err());
        assert!(validate_config_path(Path::new("")).is_err());
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = load_config_from_file(Path::new("/nonexistent/path/forge.toml"));
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_load_invalid_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("forge.toml");
        fs::write(&config_path, "[media\nprivilege = ").unwrap();

        let result = load_config_from_file(&config_path);
        assert!(matches!(result, Err(ConfigError::InvalidToml(_))));
    }

    #[test]
    fn test_resolve_prefers_workspace_file() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("forge.toml"), "[build]\njobs = 2\n").unwrap();

        let (config, used) = resolve_config(None, temp_dir.path()).unwrap();
        assert_eq!(config.build.jobs, 2);
        assert_eq!(used, Some(temp_dir.path().join("forge.toml")));
    }

    #[test]
    fn test_resolve_explicit_missing_is_error() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("other.toml");
        assert!(matches!(
            resolve_config(Some(&missing), temp_dir.path()),
            Err(ConfigError::FileNotFound(_))
        ));
    }
}

//! Configure stage and the configuration stamp.
//!
//! The stamp is the JSON form of the `BuildConfiguration` that last
//! configured the tree successfully. Build refuses to run unless it matches
//! the current configuration and is at least as new as `configure`.

use super::{ensure_not_cancelled, ensure_parent};
use crate::config::ForgeContext;
use crate::error::BuildError;
use crate::models::BuildConfiguration;
use crate::orchestrator::CancelToken;
use crate::system::command::{CommandRunner, Invocation};
use crate::system::paths::WorkspacePaths;
use std::time::SystemTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigureOutcome {
    /// The external configure step ran and the stamp was written.
    Configured,
    /// The stamp already matched; configure was skipped.
    Reused,
}

/// Configuration for the current run: toolchain, policy and absolute prefix.
pub fn derive_configuration(ctx: &ForgeContext) -> BuildConfiguration {
    BuildConfiguration::derive(
        &ctx.config.toolchain,
        &ctx.config.configure.platform,
        &ctx.paths.install_dir,
        &ctx.config.configure.disabled_features,
    )
}

pub fn configure(
    ctx: &ForgeContext,
    runner: &dyn CommandRunner,
    cancel: &CancelToken,
) -> Result<ConfigureOutcome, BuildError> {
    let configuration = derive_configuration(ctx);

    if verify_stamp(&ctx.paths, &configuration).is_ok() && ctx.paths.makefile().exists() {
        log::info!("[Build] [CONFIGURE] Configuration unchanged, reusing existing Makefile");
        return Ok(ConfigureOutcome::Reused);
    }

    ensure_not_cancelled(cancel)?;
    let mut invocation = Invocation::new(ctx.paths.configure_script().to_string_lossy())
        .args(configuration.configure_args())
        .current_dir(&ctx.paths.source_dir)
        .streamed();
    for (key, value) in configuration.configure_env() {
        invocation = invocation.env(key, value);
    }

    log::info!(
        "[Build] [CONFIGURE] target={} host={} platform={} prefix={}",
        configuration.toolchain.target,
        configuration.toolchain.host,
        configuration.platform,
        configuration.prefix.display()
    );
    let output = runner.run(&invocation)?;
    ensure_not_cancelled(cancel)?;
    if !output.is_success() {
        log::error!("[Build] [CONFIGURE] configure failed with {}", output.status_text());
        return Err(BuildError::ConfigurationFailed(output.diagnostic()));
    }

    if runner.is_dry_run() {
        log::info!("[Build] [DRY-RUN] Would write configuration stamp");
    } else {
        write_stamp(&ctx.paths, &configuration)?;
    }
    Ok(ConfigureOutcome::Configured)
}

pub fn read_stamp(paths: &WorkspacePaths) -> Option<BuildConfiguration> {
    let content = std::fs::read_to_string(paths.config_stamp()).ok()?;
    match serde_json::from_str(&content) {
        Ok(configuration) => Some(configuration),
        Err(e) => {
            log::warn!("[Build] [CONFIGURE] Ignoring unreadable configuration stamp: {}", e);
            None
        }
    }
}

pub fn write_stamp(
    paths: &WorkspacePaths,
    configuration: &BuildConfiguration,
) -> Result<(), BuildError> {
    let stamp = paths.config_stamp();
    ensure_parent(&stamp)?;
    let json = serde_json::to_string_pretty(configuration)
        .map_err(|e| BuildError::ConfigurationFailed(format!("cannot serialize stamp: {}", e)))?;
    std::fs::write(&stamp, json)?;
    log::debug!("[Build] [CONFIGURE] Stamp written to {}", stamp.display());
    Ok(())
}

/// The stamp must equal `configuration` and be at least as new as `configure`.
pub fn verify_stamp(
    paths: &WorkspacePaths,
    configuration: &BuildConfiguration,
) -> Result<(), BuildError> {
    let recorded = read_stamp(paths).ok_or_else(|| {
        BuildError::StaleConfiguration("tree has not been configured".to_string())
    })?;
    if &recorded != configuration {
        return Err(BuildError::StaleConfiguration(
            "toolchain or configure policy changed since the last configure".to_string(),
        ));
    }

    let stamp_time = modified(&paths.config_stamp());
    let script_time = modified(&paths.configure_script());
    match (stamp_time, script_time) {
        (Some(stamp), Some(script)) if stamp >= script => Ok(()),
        (_, None) => Err(BuildError::StaleConfiguration(
            "configure script is missing".to_string(),
        )),
        _ => Err(BuildError::StaleConfiguration(
            "configure was regenerated after the last configure run".to_string(),
        )),
    }
}

fn modified(path: &std::path::Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

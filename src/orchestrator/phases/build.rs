//! Compile, install and clean.

use super::configure::{derive_configuration, verify_stamp};
use super::{ensure_not_cancelled, remove_path};
use crate::config::ForgeContext;
use crate::error::BuildError;
use crate::orchestrator::CancelToken;
use crate::system::command::{CommandRunner, Invocation};
use std::path::PathBuf;

/// Compile the configured tree with `make -j<N>`.
pub fn build(
    ctx: &ForgeContext,
    runner: &dyn CommandRunner,
    cancel: &CancelToken,
) -> Result<(), BuildError> {
    if runner.is_dry_run() {
        log::info!("[Build] [DRY-RUN] Skipping configuration stamp check");
    } else {
        verify_stamp(&ctx.paths, &derive_configuration(ctx))?;
    }
    ensure_not_cancelled(cancel)?;

    let jobs = ctx.config.build.effective_jobs();
    log::info!("[Build] [EXECUTOR] make -j{} in {}", jobs, ctx.paths.source_dir.display());
    let invocation = Invocation::new("make")
        .arg(format!("-j{}", jobs))
        .current_dir(&ctx.paths.source_dir)
        .streamed();
    let output = runner.run(&invocation)?;
    ensure_not_cancelled(cancel)?;
    if !output.is_success() {
        return Err(BuildError::BuildFailed(format!(
            "make exited with {}: {}",
            output.status_text(),
            output.diagnostic_tail()
        )));
    }
    log::info!("[Build] [EXECUTOR] Compilation finished");
    Ok(())
}

/// `make install` into the configured prefix.
pub fn install(
    ctx: &ForgeContext,
    runner: &dyn CommandRunner,
    cancel: &CancelToken,
) -> Result<(), BuildError> {
    ensure_not_cancelled(cancel)?;
    let invocation = Invocation::new("make")
        .arg("install")
        .current_dir(&ctx.paths.source_dir)
        .streamed();
    let output = runner.run(&invocation)?;
    ensure_not_cancelled(cancel)?;
    if !output.is_success() {
        return Err(BuildError::InstallFailed(format!(
            "make install exited with {}: {}",
            output.status_text(),
            output.diagnostic_tail()
        )));
    }
    log::info!("[Build] [INSTALL] Installed into {}", ctx.paths.install_dir.display());
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanReport {
    pub distclean_ran: bool,
    pub removed: Vec<PathBuf>,
}

/// Return the tree to its unconfigured state.
///
/// `make distclean` only runs when a Makefile exists; the stamp, the
/// install tree and the firmware blob are removed either way.
pub fn clean(ctx: &ForgeContext, runner: &dyn CommandRunner) -> Result<CleanReport, BuildError> {
    let mut report = CleanReport::default();

    if ctx.paths.makefile().exists() {
        let invocation = Invocation::new("make")
            .arg("distclean")
            .current_dir(&ctx.paths.source_dir)
            .streamed();
        let output = runner.run(&invocation)?;
        if !output.is_success() {
            return Err(BuildError::BuildFailed(format!(
                "make distclean exited with {}: {}",
                output.status_text(),
                output.diagnostic_tail()
            )));
        }
        report.distclean_ran = true;
    } else {
        log::info!("[Build] [CLEAN] No Makefile, tree is not configured");
    }

    for path in [
        ctx.paths.config_stamp(),
        ctx.paths.install_dir.clone(),
        ctx.paths.firmware_blob.clone(),
    ] {
        if runner.is_dry_run() {
            if path.exists() {
                log::info!("[Build] [DRY-RUN] Would remove {}", path.display());
            }
            continue;
        }
        if remove_path(&path)? {
            log::info!("[Build] [CLEAN] Removed {}", path.display());
            report.removed.push(path);
        }
    }
    Ok(report)
}

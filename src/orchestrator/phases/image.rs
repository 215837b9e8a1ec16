//! Firmware blob assembly with grub-mkimage.
//!
//! One invocation embeds the whole manifest. The argument vector depends only
//! on configuration and resolved paths, so identical inputs produce identical
//! invocations.

use super::{ensure_not_cancelled, ensure_parent};
use crate::config::ForgeContext;
use crate::error::BuildError;
use crate::orchestrator::CancelToken;
use crate::system::command::{CommandRunner, Invocation};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageOutcome {
    Assembled { blob: PathBuf, modules: usize },
    /// No image-maker was built; not an error.
    Skipped { reason: String },
}

/// Image-maker binary and the module directory that goes with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageMaker {
    pub binary: PathBuf,
    pub module_dir: PathBuf,
}

/// The newer of the installed and in-tree image-makers.
///
/// A stale `install/` tree left from an earlier `--install` loses to a fresh
/// in-tree build. Equal timestamps favour the installed tree.
pub fn locate_image_maker(ctx: &ForgeContext) -> Option<ImageMaker> {
    let format = ctx.image_format();
    let installed = ImageMaker {
        binary: ctx.paths.install_dir.join("bin").join("grub-mkimage"),
        module_dir: ctx.paths.install_dir.join("lib").join("grub").join(format),
    };
    let in_tree = ImageMaker {
        binary: ctx.paths.source_dir.join("grub-mkimage"),
        module_dir: ctx.paths.source_dir.join("grub-core"),
    };

    match (modified(&installed.binary), modified(&in_tree.binary)) {
        (Some(installed_at), Some(in_tree_at)) if in_tree_at > installed_at => {
            log::info!("[Build] [IMAGE] In-tree grub-mkimage is newer than the installed one");
            Some(in_tree)
        }
        (Some(_), _) => Some(installed),
        (None, Some(_)) => Some(in_tree),
        (None, None) => None,
    }
}

fn modified(binary: &Path) -> Option<SystemTime> {
    let meta = std::fs::metadata(binary).ok().filter(|m| m.is_file())?;
    meta.modified().ok()
}

pub fn image_invocation(ctx: &ForgeContext, maker: &ImageMaker) -> Invocation {
    Invocation::new(maker.binary.to_string_lossy())
        .arg("-d")
        .path_arg(&maker.module_dir)
        .arg("-O")
        .arg(ctx.image_format())
        .arg("-o")
        .path_arg(&ctx.paths.firmware_blob)
        .arg("-p")
        .arg(ctx.config.image.prefix.as_str())
        .arg("-C")
        .arg(ctx.config.image.compression.as_arg())
        .args(ctx.manifest.modules().iter().cloned())
}

pub fn assemble(
    ctx: &ForgeContext,
    runner: &dyn CommandRunner,
    cancel: &CancelToken,
) -> Result<ImageOutcome, BuildError> {
    let maker = match locate_image_maker(ctx) {
        Some(maker) => maker,
        None => {
            let reason = format!(
                "grub-mkimage not found in {} or {}",
                ctx.paths.install_dir.join("bin").display(),
                ctx.paths.source_dir.display()
            );
            log::warn!("[Build] [IMAGE] Skipping firmware image: {}", reason);
            return Ok(ImageOutcome::Skipped { reason });
        }
    };
    ensure_not_cancelled(cancel)?;

    if !runner.is_dry_run() {
        ensure_parent(&ctx.paths.firmware_blob)?;
        // The size check below must only see what this invocation wrote.
        if ctx.paths.firmware_blob.exists() {
            std::fs::remove_file(&ctx.paths.firmware_blob)?;
        }
    }
    log::info!(
        "[Build] [IMAGE] Assembling {} with {} modules ({}, modules from {})",
        ctx.image_format(),
        ctx.manifest.len(),
        maker.binary.display(),
        maker.module_dir.display()
    );
    let output = runner.run(&image_invocation(ctx, &maker))?;
    if !output.is_success() {
        return Err(BuildError::ImageAssemblyFailed(format!(
            "grub-mkimage exited with {}: {}",
            output.status_text(),
            output.diagnostic()
        )));
    }

    if !runner.is_dry_run() {
        let size = std::fs::metadata(&ctx.paths.firmware_blob)
            .map(|m| m.len())
            .unwrap_or(0);
        if size == 0 {
            return Err(BuildError::ImageAssemblyFailed(format!(
                "no firmware blob written at {}",
                ctx.paths.firmware_blob.display()
            )));
        }
        log::info!(
            "[Build] [IMAGE] Firmware blob written: {} ({} bytes)",
            ctx.paths.firmware_blob.display(),
            size
        );
    }

    Ok(ImageOutcome::Assembled {
        blob: ctx.paths.firmware_blob.clone(),
        modules: ctx.manifest.len(),
    })
}

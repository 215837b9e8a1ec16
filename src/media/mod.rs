//! Virtual media staging: create, format, mount, populate, unmount.
//!
//! Every call of [`MediaStager::stage`] leaves the scratch mountpoint absent
//! and unmounted, whether it succeeds or fails. The exceptions are a
//! non-empty leftover directory, which is refused untouched, and a failed
//! unmount, which is reported as `UnmountFailed` with the manual command.

pub mod mount;
pub mod state;
pub mod validate;

pub use mount::{is_mountpoint, MountGuard};
pub use state::{MediaLifecycle, MediaState};

use crate::config::ForgeContext;
use crate::error::MediaError;
use crate::orchestrator::CancelToken;
use crate::system::command::{CommandRunner, Invocation};
use crate::system::privilege::PrivilegeBoundary;
use std::path::{Path, PathBuf};

const MIB: u64 = 1024 * 1024;

/// Boot files land here inside the FAT filesystem.
const EFI_BOOT_DIR: &str = "EFI/BOOT";
const BOOT_MENU_NAME: &str = "grub.cfg";

/// What a staging run did to each medium.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageReport {
    pub disk_created: bool,
    pub image_formatted: bool,
    pub populated: bool,
}

pub struct MediaStager<'a> {
    ctx: &'a ForgeContext,
    runner: &'a dyn CommandRunner,
    cancel: &'a CancelToken,
    lifecycle: MediaLifecycle,
}

impl<'a> MediaStager<'a> {
    pub fn new(
        ctx: &'a ForgeContext,
        runner: &'a dyn CommandRunner,
        cancel: &'a CancelToken,
    ) -> Self {
        MediaStager {
            ctx,
            runner,
            cancel,
            lifecycle: MediaLifecycle::default(),
        }
    }

    pub fn lifecycle(&self) -> &MediaLifecycle {
        &self.lifecycle
    }

    fn privilege(&self) -> PrivilegeBoundary {
        self.ctx.config.media.privilege
    }

    fn dry_run(&self) -> bool {
        self.runner.is_dry_run()
    }

    fn check_cancel(&self) -> Result<(), MediaError> {
        if self.cancel.is_cancelled() {
            log::warn!("[Media] [CANCEL] Stopping before the next step");
            return Err(MediaError::Cancelled);
        }
        Ok(())
    }

    fn advance(&mut self, next: MediaState) -> Result<(), MediaError> {
        self.lifecycle
            .transition_to(next)
            .map_err(|e| MediaError::Io(std::io::Error::other(e)))
    }

    /// Inputs must exist before anything is created.
    pub fn preflight(&self) -> Result<(), MediaError> {
        let paths = &self.ctx.paths;
        if !paths.firmware_blob.is_file() {
            return Err(MediaError::MissingFirmwareBlob(
                paths.firmware_blob.display().to_string(),
            ));
        }
        if !paths.boot_menu.is_file() {
            return Err(MediaError::MissingBootMenu(paths.boot_menu.display().to_string()));
        }
        self.privilege().check_available()
    }

    /// Full sequence: preflight, create, format, populate, release.
    pub fn stage(&mut self) -> Result<StageReport, MediaError> {
        self.preflight()?;
        crate::log_milestone!("[Media] Staging boot media ({} mode)", self.privilege());

        let mut report = StageReport {
            disk_created: self.create_disk()?,
            ..Default::default()
        };
        self.advance(MediaState::Created)?;
        self.check_cancel()?;

        report.image_formatted = self.format_boot_image()?;
        self.advance(MediaState::Formatted)?;
        self.check_cancel()?;

        if self.privilege().uses_mount() {
            self.populate_mounted()?;
        } else {
            self.populate_mtools()?;
            self.advance(MediaState::Populated)?;
        }
        report.populated = true;

        crate::log_milestone!(
            "[Media] Boot image ready: {}",
            self.ctx.paths.boot_image.display()
        );
        Ok(report)
    }

    /// Create the growable disk if absent. Returns whether it was created.
    pub fn create_disk(&mut self) -> Result<bool, MediaError> {
        let disk = &self.ctx.paths.disk_image;
        if disk.exists() {
            log::info!("[Media] [CREATE] Reusing growable disk {}", disk.display());
            if self.ctx.config.media.validate_existing {
                validate::validate_growable_disk(disk)?;
            }
            return Ok(false);
        }

        if !self.dry_run() {
            ensure_parent(disk)?;
        }
        let invocation = Invocation::new("qemu-img")
            .args(["create", "-f", "qcow2"])
            .path_arg(disk)
            .arg(self.ctx.config.media.disk_size.as_str());
        let output = self
            .runner
            .run(&invocation)
            .map_err(|e| MediaError::CreateFailed(e.to_string()))?;
        if !output.is_success() {
            if !self.dry_run() && disk.exists() {
                let _ = std::fs::remove_file(disk);
            }
            return Err(MediaError::CreateFailed(output.diagnostic()));
        }
        log::info!(
            "[Media] [CREATE] Created {} growable disk {}",
            self.ctx.config.media.disk_size,
            disk.display()
        );
        Ok(true)
    }

    /// Allocate and format the flat image unless it already exists.
    /// Returns whether it was formatted.
    pub fn format_boot_image(&mut self) -> Result<bool, MediaError> {
        let image = &self.ctx.paths.boot_image;
        let size = self.ctx.config.media.boot_image_size_mib * MIB;
        if image.exists() {
            log::info!("[Media] [FORMAT] Reusing boot image {}", image.display());
            if self.ctx.config.media.validate_existing {
                validate::validate_flat_image(image, size)?;
            }
            return Ok(false);
        }

        if self.dry_run() {
            log::info!(
                "[Media] [DRY-RUN] Would allocate {} MiB at {}",
                self.ctx.config.media.boot_image_size_mib,
                image.display()
            );
        } else {
            ensure_parent(image)?;
            let file = std::fs::File::create(image)?;
            if let Err(e) = file.set_len(size) {
                let _ = std::fs::remove_file(image);
                return Err(MediaError::FormatFailed(format!("cannot allocate image: {}", e)));
            }
        }

        let invocation = Invocation::new("mkfs.fat")
            .args(["-F", "32", "-n"])
            .arg(self.ctx.config.media.volume_label.as_str())
            .path_arg(image);
        let failure = match self.runner.run(&invocation) {
            Ok(output) if output.is_success() => None,
            Ok(output) => Some(output.diagnostic()),
            Err(e) => Some(e.to_string()),
        };
        if let Some(diagnostic) = failure {
            if !self.dry_run() {
                if let Err(e) = std::fs::remove_file(image) {
                    log::error!(
                        "[Media] [FORMAT] Could not remove partial image {}: {}",
                        image.display(),
                        e
                    );
                }
            }
            return Err(MediaError::FormatFailed(diagnostic));
        }
        log::info!("[Media] [FORMAT] Formatted {} as FAT32", image.display());
        Ok(true)
    }

    fn populate_mounted(&mut self) -> Result<(), MediaError> {
        let ctx = self.ctx;
        let paths = &ctx.paths;
        let guard = MountGuard::acquire(
            &paths.boot_image,
            &paths.scratch_mount,
            self.runner,
            self.privilege(),
        )?;
        self.advance(MediaState::Mounted)?;

        let result = self
            .check_cancel()
            .and_then(|_| self.copy_into_mount(guard.mountpoint()));
        let released = guard.release();

        match result {
            Ok(()) => {
                self.advance(MediaState::Populated)?;
                released?;
                self.advance(MediaState::Unmounted)?;
                Ok(())
            }
            Err(e) => match released {
                // A leaked mount outranks the populate failure.
                Err(release_err) => {
                    log::error!("[Media] [POPULATE] {}", e);
                    Err(release_err)
                }
                Ok(()) => {
                    self.advance(MediaState::Unmounted)?;
                    Err(e)
                }
            },
        }
    }

    fn copy_into_mount(&self, mountpoint: &Path) -> Result<(), MediaError> {
        let boot_dir = mountpoint.join(EFI_BOOT_DIR);
        let privilege = self.privilege();
        let steps = [
            privilege.elevate(Invocation::new("mkdir").arg("-p").path_arg(&boot_dir)),
            privilege.elevate(
                Invocation::new("cp")
                    .path_arg(&self.ctx.paths.firmware_blob)
                    .path_arg(&boot_dir.join(self.ctx.arch.efi_boot_filename())),
            ),
            privilege.elevate(
                Invocation::new("cp")
                    .path_arg(&self.ctx.paths.boot_menu)
                    .path_arg(&boot_dir.join(BOOT_MENU_NAME)),
            ),
            Invocation::new("sync"),
        ];
        for step in &steps {
            self.run_populate_step(step)?;
        }
        log::info!(
            "[Media] [POPULATE] Copied {} and {} into {}",
            self.ctx.arch.efi_boot_filename(),
            BOOT_MENU_NAME,
            EFI_BOOT_DIR
        );
        Ok(())
    }

    /// User-space population: no mount, no scratch directory.
    fn populate_mtools(&self) -> Result<(), MediaError> {
        let image = &self.ctx.paths.boot_image;
        let boot_dir = format!("::/{}", EFI_BOOT_DIR);

        let listing = Invocation::new("mdir")
            .arg("-i")
            .path_arg(image)
            .arg(boot_dir.as_str());
        let exists = self
            .runner
            .run(&listing)
            .map_err(|e| MediaError::PopulateFailed(e.to_string()))?
            .is_success();
        if !exists {
            self.run_populate_step(
                &Invocation::new("mmd")
                    .arg("-i")
                    .path_arg(image)
                    .args(["::/EFI", boot_dir.as_str()]),
            )?;
        }

        let copies = [
            (
                &self.ctx.paths.firmware_blob,
                format!("{}/{}", boot_dir, self.ctx.arch.efi_boot_filename()),
            ),
            (
                &self.ctx.paths.boot_menu,
                format!("{}/{}", boot_dir, BOOT_MENU_NAME),
            ),
        ];
        for (source, target) in copies {
            self.check_cancel()?;
            self.run_populate_step(
                &Invocation::new("mcopy")
                    .args(["-o", "-i"])
                    .path_arg(image)
                    .path_arg(source)
                    .arg(target),
            )?;
        }
        log::info!("[Media] [POPULATE] Copied boot files with mtools");
        Ok(())
    }

    fn run_populate_step(&self, invocation: &Invocation) -> Result<(), MediaError> {
        let output = self
            .runner
            .run(invocation)
            .map_err(|e| MediaError::PopulateFailed(e.to_string()))?;
        if !output.is_success() {
            return Err(MediaError::PopulateFailed(format!(
                "{} exited with {}: {}",
                invocation.program,
                output.status_text(),
                output.diagnostic()
            )));
        }
        Ok(())
    }

    /// Remove both media and any leftover scratch directory.
    pub fn clean(&self) -> Result<Vec<PathBuf>, MediaError> {
        let paths = &self.ctx.paths;
        if is_mountpoint(&paths.scratch_mount) {
            return Err(MediaError::MountFailed(format!(
                "{} is still mounted; run: {}",
                paths.scratch_mount.display(),
                self.privilege()
                    .elevate(Invocation::new("umount").path_arg(&paths.scratch_mount))
            )));
        }

        let mut removed = Vec::new();
        for path in [&paths.disk_image, &paths.boot_image, &paths.scratch_mount] {
            if !path.exists() {
                continue;
            }
            if self.dry_run() {
                log::info!("[Media] [DRY-RUN] Would remove {}", path.display());
                continue;
            }
            if path.is_dir() {
                std::fs::remove_dir_all(path)?;
            } else {
                std::fs::remove_file(path)?;
            }
            log::info!("[Media] [CLEAN] Removed {}", path.display());
            removed.push(path.clone());
        }
        Ok(removed)
    }
}

fn ensure_parent(path: &Path) -> Result<(), MediaError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

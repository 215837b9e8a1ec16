//! Scoped loop mount of the flat boot image.
//!
//! `MountGuard` owns the scratch mountpoint from a successful mount until
//! release. `release` unmounts and removes the directory. A failed unmount
//! is logged and returned as `UnmountFailed` carrying the manual command.
//! Dropping an unreleased guard does the same. Only one guard may be live
//! per process.

use crate::error::MediaError;
use crate::system::command::{CommandRunner, Invocation};
use crate::system::privilege::PrivilegeBoundary;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

static MOUNT_ACTIVE: AtomicBool = AtomicBool::new(false);

/// True when `path` is a directory on a different device than its parent.
pub fn is_mountpoint(path: &Path) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    let parent = path.parent().unwrap_or_else(|| Path::new("/"));
    match std::fs::metadata(parent) {
        Ok(parent_meta) => meta.is_dir() && meta.dev() != parent_meta.dev(),
        Err(_) => false,
    }
}

pub struct MountGuard<'a> {
    mountpoint: PathBuf,
    runner: &'a dyn CommandRunner,
    privilege: PrivilegeBoundary,
    released: bool,
}

impl<'a> MountGuard<'a> {
    /// Loop-mount `image` at `mountpoint`.
    ///
    /// On any failure the scratch directory created here is removed before
    /// returning.
    pub fn acquire(
        image: &Path,
        mountpoint: &Path,
        runner: &'a dyn CommandRunner,
        privilege: PrivilegeBoundary,
    ) -> Result<Self, MediaError> {
        if MOUNT_ACTIVE
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(MediaError::MountFailed(
                "another scratch mount is already active in this process".to_string(),
            ));
        }

        match Self::mount(image, mountpoint, runner, privilege) {
            Ok(()) => Ok(MountGuard {
                mountpoint: mountpoint.to_path_buf(),
                runner,
                privilege,
                released: false,
            }),
            Err(e) => {
                MOUNT_ACTIVE.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    fn mount(
        image: &Path,
        mountpoint: &Path,
        runner: &dyn CommandRunner,
        privilege: PrivilegeBoundary,
    ) -> Result<(), MediaError> {
        if is_mountpoint(mountpoint) {
            return Err(MediaError::MountFailed(format!(
                "{} is already a mountpoint; unmount it first",
                mountpoint.display()
            )));
        }

        let dry_run = runner.is_dry_run();
        if mountpoint.exists() {
            let empty = std::fs::read_dir(mountpoint)?.next().is_none();
            if !empty {
                return Err(MediaError::MountFailed(format!(
                    "scratch directory {} exists and is not empty",
                    mountpoint.display()
                )));
            }
            log::warn!(
                "[Media] [MOUNT] Removing leftover scratch directory {}",
                mountpoint.display()
            );
            if !dry_run {
                std::fs::remove_dir(mountpoint)?;
            }
        }

        if !dry_run {
            std::fs::create_dir_all(mountpoint)?;
        }

        let invocation = privilege.elevate(
            Invocation::new("mount")
                .arg("-o")
                .arg("loop")
                .path_arg(image)
                .path_arg(mountpoint),
        );
        let result = runner.run(&invocation);
        let failure = match result {
            Ok(output) if output.is_success() => None,
            Ok(output) => Some(MediaError::MountFailed(format!(
                "mount exited with {}: {}",
                output.status_text(),
                output.diagnostic()
            ))),
            Err(e) => Some(MediaError::MountFailed(e.to_string())),
        };

        if let Some(err) = failure {
            if !dry_run {
                if let Err(e) = std::fs::remove_dir(mountpoint) {
                    log::error!(
                        "[Media] [MOUNT] Could not remove scratch directory {}: {}",
                        mountpoint.display(),
                        e
                    );
                }
            }
            return Err(err);
        }

        log::info!("[Media] [MOUNT] {} mounted at {}", image.display(), mountpoint.display());
        Ok(())
    }

    pub fn mountpoint(&self) -> &Path {
        &self.mountpoint
    }

    /// Unmount and remove the scratch directory.
    pub fn release(mut self) -> Result<(), MediaError> {
        self.released = true;
        self.unmount()
    }

    fn unmount(&self) -> Result<(), MediaError> {
        let invocation = self
            .privilege
            .elevate(Invocation::new("umount").path_arg(&self.mountpoint));
        let output = self
            .runner
            .run(&invocation)
            .map_err(|e| self.unmount_failed(e.to_string()))?;
        if !output.is_success() {
            return Err(self.unmount_failed(format!(
                "umount exited with {}: {}",
                output.status_text(),
                output.diagnostic()
            )));
        }

        if !self.runner.is_dry_run() && self.mountpoint.exists() {
            std::fs::remove_dir(&self.mountpoint).map_err(|e| {
                self.unmount_failed(format!(
                    "could not remove {}: {}",
                    self.mountpoint.display(),
                    e
                ))
            })?;
        }
        log::info!("[Media] [UNMOUNT] Scratch mountpoint released");
        Ok(())
    }

    /// Every unmount failure names the command that finishes the job by hand.
    fn unmount_failed(&self, detail: String) -> MediaError {
        let error = MediaError::UnmountFailed(format!(
            "{}; {} is still in use, run: {}",
            detail,
            self.mountpoint.display(),
            self.manual_cleanup_command()
        ));
        log::error!("[Media] [CLEANUP] {}", error);
        error
    }

    fn manual_cleanup_command(&self) -> String {
        let umount = self
            .privilege
            .elevate(Invocation::new("umount").path_arg(&self.mountpoint));
        format!("{} && rmdir {}", umount, self.mountpoint.display())
    }
}

impl Drop for MountGuard<'_> {
    fn drop(&mut self) {
        if !self.released {
            log::warn!("[Media] [CLEANUP] Releasing scratch mount on error path");
            // unmount logs its own failure with the manual command.
            let _ = self.unmount();
        }
        MOUNT_ACTIVE.store(false, Ordering::SeqCst);
    }
}

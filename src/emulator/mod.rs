//! Emulator launch: media selection, machine profile, exec.
//!
//! [`plan`] is pure and fully inspectable; [`launch`] replaces the current
//! process with the emulator described by the plan.

use crate::config::ForgeContext;
use crate::error::LaunchError;
use crate::models::{MediaKind, VirtualMedia};
use crate::orchestrator::phases::gate::emulator_binary;
use crate::system::command::Invocation;
use std::path::{Path, PathBuf};

/// One foreground emulator session bound to one medium and one firmware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    pub media: VirtualMedia,
    pub firmware: PathBuf,
    pub invocation: Invocation,
}

/// Flat boot image first, then the growable disk.
pub fn select_media(ctx: &ForgeContext) -> Result<VirtualMedia, LaunchError> {
    let flat = VirtualMedia::new(MediaKind::FlatBootImage, &ctx.paths.boot_image);
    let disk = VirtualMedia::new(MediaKind::GrowableDisk, &ctx.paths.disk_image);
    [flat, disk]
        .into_iter()
        .find(VirtualMedia::exists)
        .ok_or_else(|| LaunchError::MissingMedia {
            flat: ctx.paths.boot_image.display().to_string(),
            disk: ctx.paths.disk_image.display().to_string(),
        })
}

pub fn firmware_path(ctx: &ForgeContext) -> PathBuf {
    match ctx.config.emulator.firmware {
        Some(ref firmware) => ctx.paths.resolve_relative(firmware),
        None => PathBuf::from(ctx.arch.default_firmware()),
    }
}

/// Resolve media and firmware and assemble the emulator command line.
pub fn plan(ctx: &ForgeContext) -> Result<LaunchPlan, LaunchError> {
    let media = select_media(ctx)?;
    let firmware = firmware_path(ctx);
    if !firmware.is_file() {
        return Err(LaunchError::MissingFirmware(firmware.display().to_string()));
    }

    let emu = &ctx.config.emulator;
    let machine = emu
        .machine
        .clone()
        .unwrap_or_else(|| ctx.arch.default_machine().to_string());
    let cpu = emu
        .cpu
        .clone()
        .unwrap_or_else(|| ctx.arch.default_cpu().to_string());

    let invocation = Invocation::new(emulator_binary(ctx))
        .args(["-machine", machine.as_str(), "-cpu", cpu.as_str()])
        .arg("-smp")
        .arg(emu.cores.to_string())
        .arg("-m")
        .arg(emu.memory_mib.to_string())
        .arg("-bios")
        .path_arg(&firmware)
        .arg("-drive")
        .arg(format!(
            "if=none,id=hd0,format={},file={}",
            media.kind.drive_format(),
            drive_option_value(&media.path)
        ))
        .args(["-device", "virtio-blk-pci,drive=hd0"])
        .arg("-netdev")
        .arg(format!(
            "user,id=net0,hostfwd=tcp::{}-:{}",
            emu.host_port, emu.guest_port
        ))
        .args(["-device", "virtio-net-pci,netdev=net0", "-nographic"])
        .args(emu.extra_args.iter().cloned());

    Ok(LaunchPlan {
        media,
        firmware,
        invocation,
    })
}

/// QEMU option values treat `,` as a separator; a literal comma is doubled.
fn drive_option_value(path: &Path) -> String {
    path.display().to_string().replace(',', ",,")
}

/// Exec the planned emulator. Only returns on failure.
pub fn launch(plan: &LaunchPlan) -> LaunchError {
    use std::os::unix::process::CommandExt;

    crate::log_milestone!(
        "[Emulator] Booting {} ({}) with {}",
        plan.media.path.display(),
        plan.media.kind.drive_format(),
        plan.firmware.display()
    );
    log::info!("[Emulator] {}", plan.invocation);
    log::logger().flush();
    let source = plan.invocation.to_command().exec();
    LaunchError::ExecFailed {
        program: plan.invocation.program.clone(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ForgeConfig;
    use std::fs;
    use tempfile::TempDir;

    fn context(temp: &TempDir) -> ForgeContext {
        fs::write(temp.path().join("QEMU_EFI.fd"), b"fw").unwrap();
        let mut config = ForgeConfig::default();
        config.emulator.firmware = Some(PathBuf::from("QEMU_EFI.fd"));
        ForgeContext::new(temp.path(), config).unwrap()
    }

    #[test]
    fn test_missing_media_checked_before_firmware() {
        let temp = TempDir::new().unwrap();
        let ctx = ForgeContext::new(temp.path(), {
            let mut config = ForgeConfig::default();
            config.emulator.firmware = Some(PathBuf::from("missing.fd"));
            config
        })
        .unwrap();
        assert!(matches!(plan(&ctx), Err(LaunchError::MissingMedia { .. })));
    }

    #[test]
    fn test_missing_firmware() {
        let temp = TempDir::new().unwrap();
        let mut config = ForgeConfig::default();
        config.emulator.firmware = Some(PathBuf::from("missing.fd"));
        let ctx = ForgeContext::new(temp.path(), config).unwrap();
        fs::create_dir_all(ctx.paths.disk_image.parent().unwrap()).unwrap();
        fs::write(&ctx.paths.disk_image, b"QFI\xfb").unwrap();
        assert!(matches!(plan(&ctx), Err(LaunchError::MissingFirmware(_))));
    }

    #[test]
    fn test_disk_only_uses_qcow2() {
        let temp = TempDir::new().unwrap();
        let ctx = context(&temp);
        fs::create_dir_all(ctx.paths.disk_image.parent().unwrap()).unwrap();
        fs::write(&ctx.paths.disk_image, b"QFI\xfb").unwrap();

        let plan = plan(&ctx).unwrap();
        assert_eq!(plan.media.kind, MediaKind::GrowableDisk);
        assert!(plan
            .invocation
            .args
            .iter()
            .any(|a| a.starts_with("if=none,id=hd0,format=qcow2,")));
    }

    #[test]
    fn test_machine_profile() {
        let temp = TempDir::new().unwrap();
        let mut ctx = context(&temp);
        ctx.config.emulator.extra_args = vec!["-s".to_string()];
        fs::create_dir_all(ctx.paths.boot_image.parent().unwrap()).unwrap();
        fs::write(&ctx.paths.boot_image, b"").unwrap();

        let plan = plan(&ctx).unwrap();
        let args = &plan.invocation.args;
        assert_eq!(plan.invocation.program, "qemu-system-aarch64");
        assert_eq!(
            &args[..8],
            ["-machine", "virt", "-cpu", "cortex-a57", "-smp", "4", "-m", "2048"]
        );
        assert!(args.contains(&"user,id=net0,hostfwd=tcp::2222-:22".to_string()));
        assert!(args.contains(&"-nographic".to_string()));
        assert_eq!(args.last().unwrap(), "-s");
    }

    #[test]
    fn test_comma_in_media_path_is_doubled() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("grub,arm64");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("QEMU_EFI.fd"), b"fw").unwrap();
        let mut config = ForgeConfig::default();
        config.emulator.firmware = Some(PathBuf::from("QEMU_EFI.fd"));
        let ctx = ForgeContext::new(&root, config).unwrap();
        fs::create_dir_all(ctx.paths.boot_image.parent().unwrap()).unwrap();
        fs::write(&ctx.paths.boot_image, b"").unwrap();

        let plan = plan(&ctx).unwrap();
        let drive = plan
            .invocation
            .args
            .iter()
            .find(|a| a.starts_with("if=none"))
            .unwrap();
        assert!(drive.contains("/grub,,arm64/"));
        assert!(drive.ends_with("boot.img"));
    }
}

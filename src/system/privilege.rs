//! Explicit privilege boundary for media staging.
//!
//! Only the commands that touch the loop mount are elevated, and only through
//! the helper the operator configured. `mtools` avoids privilege entirely by
//! writing into the FAT image from user space.

use crate::error::MediaError;
use crate::system::command::Invocation;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PrivilegeBoundary {
    /// Prefix privileged commands with `sudo`.
    #[default]
    Sudo,
    /// Prefix privileged commands with `pkexec` (PolicyKit prompt).
    Pkexec,
    /// Run privileged commands as-is; the process must already be root.
    None,
    /// No mount at all: populate the image with mtools.
    Mtools,
}

impl PrivilegeBoundary {
    /// Whether staging goes through a loop mount at the scratch mountpoint.
    pub fn uses_mount(&self) -> bool {
        !matches!(self, PrivilegeBoundary::Mtools)
    }

    fn helper(&self) -> Option<&'static str> {
        match self {
            PrivilegeBoundary::Sudo => Some("sudo"),
            PrivilegeBoundary::Pkexec => Some("pkexec"),
            PrivilegeBoundary::None | PrivilegeBoundary::Mtools => None,
        }
    }

    /// Route an invocation across the boundary.
    pub fn elevate(&self, invocation: Invocation) -> Invocation {
        match self.helper() {
            Some(helper) => {
                let mut args = Vec::with_capacity(invocation.args.len() + 1);
                args.push(invocation.program);
                args.extend(invocation.args);
                Invocation {
                    program: helper.to_string(),
                    args,
                    ..invocation
                }
            }
            None => invocation,
        }
    }

    /// Tools the boot orchestrator's dependency gate must resolve.
    pub fn required_tools(&self) -> Vec<&'static str> {
        let mut tools = match self {
            PrivilegeBoundary::Mtools => vec!["mmd", "mcopy", "mdir"],
            _ => vec!["mount", "umount"],
        };
        if let Some(helper) = self.helper() {
            tools.push(helper);
        }
        tools
    }

    /// Fail early when running unelevated commands without root.
    pub fn check_available(&self) -> Result<(), MediaError> {
        if *self == PrivilegeBoundary::None && !nix::unistd::geteuid().is_root() {
            return Err(MediaError::PrivilegeUnavailable(
                "privilege = \"none\" requires running as root; use sudo, pkexec or mtools"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for PrivilegeBoundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PrivilegeBoundary::Sudo => "sudo",
            PrivilegeBoundary::Pkexec => "pkexec",
            PrivilegeBoundary::None => "none",
            PrivilegeBoundary::Mtools => "mtools",
        };
        f.write_str(name)
    }
}

impl FromStr for PrivilegeBoundary {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sudo" => Ok(PrivilegeBoundary::Sudo),
            "pkexec" => Ok(PrivilegeBoundary::Pkexec),
            "none" => Ok(PrivilegeBoundary::None),
            "mtools" => Ok(PrivilegeBoundary::Mtools),
            _ => Err(format!("Unknown privilege mode: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sudo_prefixes_program() {
        let inv = PrivilegeBoundary::Sudo.elevate(
            Invocation::new("mount").args(["-o", "loop", "out/boot.img", "out/mnt"]),
        );
        assert_eq!(inv.program, "sudo");
        assert_eq!(inv.args, vec!["mount", "-o", "loop", "out/boot.img", "out/mnt"]);
    }

    #[test]
    fn test_none_and_mtools_leave_invocation_untouched() {
        let original = Invocation::new("umount").arg("out/mnt");
        assert_eq!(PrivilegeBoundary::None.elevate(original.clone()), original);
        assert_eq!(PrivilegeBoundary::Mtools.elevate(original.clone()), original);
    }

    #[test]
    fn test_required_tools() {
        assert_eq!(PrivilegeBoundary::Pkexec.required_tools(), vec!["mount", "umount", "pkexec"]);
        assert_eq!(PrivilegeBoundary::Mtools.required_tools(), vec!["mmd", "mcopy", "mdir"]);
        assert!(!PrivilegeBoundary::Mtools.uses_mount());
    }

    #[test]
    fn test_parse_round_trip_names() {
        for mode in ["sudo", "pkexec", "none", "mtools"] {
            let parsed: PrivilegeBoundary = mode.parse().unwrap();
            assert_eq!(parsed.to_string(), mode);
        }
        assert!("doas".parse::<PrivilegeBoundary>().is_err());
    }
}

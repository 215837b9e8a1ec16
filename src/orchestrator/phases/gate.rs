//! Dependency gate: every required tool must resolve before anything mutates.

use crate::config::ForgeContext;
use crate::error::BuildError;
use crate::system::{resolve_tool, resolve_tool_in};
use std::ffi::OsString;
use std::path::PathBuf;

/// Host tools the autotools build needs, in check order.
pub const HOST_TOOLS: [&str; 6] = ["autoconf", "automake", "make", "pkg-config", "flex", "bison"];

/// Tools resolved by a successful gate check.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GateReport {
    pub resolved: Vec<(String, PathBuf)>,
}

impl GateReport {
    pub fn path_of(&self, tool: &str) -> Option<&PathBuf> {
        self.resolved
            .iter()
            .find(|(name, _)| name == tool)
            .map(|(_, path)| path)
    }
}

#[derive(Debug, Clone)]
pub struct DependencyGate {
    tools: Vec<String>,
    search_path: Option<OsString>,
}

impl DependencyGate {
    pub fn new<I, S>(tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        DependencyGate {
            tools: tools.into_iter().map(Into::into).collect(),
            search_path: None,
        }
    }

    /// Host tools followed by the target cross-compiler.
    pub fn for_build(ctx: &ForgeContext) -> Self {
        let mut tools: Vec<String> = HOST_TOOLS.iter().map(|t| t.to_string()).collect();
        tools.push(ctx.config.toolchain.compiler.clone());
        DependencyGate::new(tools)
    }

    /// Disk tooling plus the tools of the configured privilege boundary.
    pub fn for_media(ctx: &ForgeContext) -> Self {
        let mut tools = vec!["qemu-img".to_string(), "mkfs.fat".to_string()];
        tools.extend(
            ctx.config
                .media
                .privilege
                .required_tools()
                .into_iter()
                .map(String::from),
        );
        DependencyGate::new(tools)
    }

    /// The emulator binary for the target architecture.
    pub fn for_emulator(ctx: &ForgeContext) -> Self {
        DependencyGate::new([emulator_binary(ctx)])
    }

    /// Resolve against an explicit search path instead of `$PATH`.
    pub fn with_search_path(mut self, search_path: impl Into<OsString>) -> Self {
        self.search_path = Some(search_path.into());
        self
    }

    pub fn tools(&self) -> &[String] {
        &self.tools
    }

    /// Resolve every tool in order, stopping at the first missing one.
    pub fn check(&self) -> Result<GateReport, BuildError> {
        let mut report = GateReport::default();
        for tool in &self.tools {
            let resolved = match self.search_path {
                Some(ref search_path) => resolve_tool_in(tool, search_path),
                None => resolve_tool(tool),
            };
            match resolved {
                Ok(path) => {
                    log::debug!("[Gate] {} -> {}", tool, path.display());
                    report.resolved.push((tool.clone(), path));
                }
                Err(e) => {
                    log::error!("[Gate] [MISSING] {} is required but was not found", tool);
                    return Err(e);
                }
            }
        }
        log::info!("[Gate] All {} required tools resolved", report.resolved.len());
        Ok(report)
    }
}

pub(crate) fn emulator_binary(ctx: &ForgeContext) -> String {
    ctx.config
        .emulator
        .binary
        .clone()
        .unwrap_or_else(|| ctx.arch.emulator_binary().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ForgeConfig;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn fake_tool(dir: &std::path::Path, name: &str) {
        let path = dir.join(name);
        fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn context(root: &std::path::Path) -> ForgeContext {
        ForgeContext::new(root, ForgeConfig::default()).unwrap()
    }

    #[test]
    fn test_build_gate_order_ends_with_compiler() {
        let temp = TempDir::new().unwrap();
        let gate = DependencyGate::for_build(&context(temp.path()));
        assert_eq!(gate.tools()[0], "autoconf");
        assert_eq!(gate.tools().last().unwrap(), "aarch64-linux-gnu-gcc");
    }

    #[test]
    fn test_reports_first_missing_tool() {
        let temp = TempDir::new().unwrap();
        let bin = temp.path().join("bin");
        fs::create_dir_all(&bin).unwrap();
        fake_tool(&bin, "autoconf");
        fake_tool(&bin, "automake");

        let gate = DependencyGate::for_build(&context(temp.path())).with_search_path(&bin);
        let err = gate.check().unwrap_err();
        assert!(matches!(err, BuildError::MissingDependency(ref t) if t == "make"));
    }

    #[test]
    fn test_all_tools_present() {
        let temp = TempDir::new().unwrap();
        let bin = temp.path().join("bin");
        fs::create_dir_all(&bin).unwrap();
        for tool in HOST_TOOLS {
            fake_tool(&bin, tool);
        }
        fake_tool(&bin, "aarch64-linux-gnu-gcc");

        let report = DependencyGate::for_build(&context(temp.path()))
            .with_search_path(&bin)
            .check()
            .unwrap();
        assert_eq!(report.resolved.len(), 7);
        assert!(report.path_of("flex").unwrap().ends_with("flex"));
    }

    #[test]
    fn test_media_gate_follows_privilege_mode() {
        let temp = TempDir::new().unwrap();
        let mut config = ForgeConfig::default();
        config.media.privilege = crate::system::privilege::PrivilegeBoundary::Mtools;
        let ctx = ForgeContext::new(temp.path(), config).unwrap();

        let gate = DependencyGate::for_media(&ctx);
        assert_eq!(gate.tools(), ["qemu-img", "mkfs.fat", "mmd", "mcopy", "mdir"]);
        assert_eq!(DependencyGate::for_emulator(&ctx).tools(), ["qemu-system-aarch64"]);
    }
}

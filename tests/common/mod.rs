//! Shared fixtures for the integration suites.
//!
//! `ScriptedRunner` stands in for the external toolchain: it records every
//! invocation and produces the files the real tools would have produced, so
//! the orchestrators can be driven end to end without autotools, QEMU or root.

#![allow(dead_code)]

use bootforge::config::{ForgeConfig, ForgeContext};
use bootforge::error::CommandError;
use bootforge::system::command::{CommandOutput, CommandRunner, Invocation};
use std::fs::{self, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;
use tokio::sync::watch;

pub struct ScriptedRunner {
    root: PathBuf,
    invocations: Mutex<Vec<Invocation>>,
    failing: Vec<String>,
    cancel_on: Option<(String, watch::Sender<bool>)>,
    cancel_after: Option<(String, watch::Sender<bool>)>,
}

impl ScriptedRunner {
    pub fn new(root: &Path) -> Self {
        ScriptedRunner {
            root: root.to_path_buf(),
            invocations: Mutex::new(Vec::new()),
            failing: Vec::new(),
            cancel_on: None,
            cancel_after: None,
        }
    }

    /// Make every run of `program` exit with status 2.
    pub fn failing(mut self, program: &str) -> Self {
        self.failing.push(program.to_string());
        self
    }

    /// Simulate Ctrl-C arriving while `program` runs.
    pub fn cancelling_on(mut self, program: &str, tx: watch::Sender<bool>) -> Self {
        self.cancel_on = Some((program.to_string(), tx));
        self
    }

    /// Simulate Ctrl-C arriving just after `program` succeeds.
    pub fn cancelling_after(mut self, program: &str, tx: watch::Sender<bool>) -> Self {
        self.cancel_after = Some((program.to_string(), tx));
        self
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().unwrap().clone()
    }

    /// Effective program names in order, with privilege helpers unwrapped.
    pub fn programs(&self) -> Vec<String> {
        self.invocations().iter().map(effective_program).collect()
    }

    pub fn count(&self, program: &str) -> usize {
        self.programs().iter().filter(|p| p.as_str() == program).count()
    }

    fn simulate(&self, program: &str, invocation: &Invocation) -> std::io::Result<()> {
        let cwd = invocation.cwd.clone().unwrap_or_else(|| self.root.clone());
        let args = effective_args(invocation);
        match program {
            "autogen.sh" => {
                fs::write(cwd.join("configure"), "#!/bin/sh\n")?;
            }
            "autoreconf" => {
                fs::write(cwd.join("configure"), "#!/bin/sh\n")?;
                fs::create_dir_all(cwd.join("build-aux"))?;
                fs::write(cwd.join("build-aux/config.sub"), "")?;
            }
            "configure" => {
                fs::write(cwd.join("Makefile"), "all:\n")?;
            }
            "make" => match args.first().map(String::as_str) {
                Some("install") => {
                    let bin = self.root.join("install/bin");
                    fs::create_dir_all(&bin)?;
                    fs::write(bin.join("grub-mkimage"), "#!/bin/sh\n")?;
                    fs::create_dir_all(self.root.join("install/lib/grub/arm64-efi"))?;
                }
                Some("distclean") => {
                    let _ = fs::remove_file(cwd.join("Makefile"));
                }
                _ => {
                    fs::write(cwd.join("grub-mkimage"), "#!/bin/sh\n")?;
                }
            },
            "grub-mkimage" => {
                if let Some(pos) = args.iter().position(|a| a == "-o") {
                    fs::write(&args[pos + 1], b"MZ firmware blob")?;
                }
            }
            "qemu-img" => {
                if let Some(path) = args.iter().rev().nth(1) {
                    fs::write(path, b"QFI\xfb\x00\x00\x00\x03")?;
                }
            }
            "mkfs.fat" => {
                if let Some(path) = args.last() {
                    write_fat32_signature(Path::new(path))?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput, CommandError> {
        self.invocations.lock().unwrap().push(invocation.clone());
        let program = effective_program(invocation);

        if let Some((ref name, ref tx)) = self.cancel_on {
            if *name == program {
                let _ = tx.send(true);
                return Ok(CommandOutput {
                    code: None,
                    ..Default::default()
                });
            }
        }
        if self.failing.contains(&program) {
            return Ok(CommandOutput::failure(2, format!("{}: simulated failure", program)));
        }
        // mdir probes report "no such directory" so mmd runs.
        if program == "mdir" {
            return Ok(CommandOutput::failure(1, "File not found"));
        }
        self.simulate(&program, invocation)
            .map_err(|_| CommandError::Pipe(program.clone()))?;
        if let Some((ref name, ref tx)) = self.cancel_after {
            if *name == program {
                let _ = tx.send(true);
            }
        }
        Ok(CommandOutput::success())
    }
}

fn unwrap_helper(invocation: &Invocation) -> (&str, &[String]) {
    match invocation.program.as_str() {
        "sudo" | "pkexec" if !invocation.args.is_empty() => {
            (invocation.args[0].as_str(), &invocation.args[1..])
        }
        program => (program, &invocation.args[..]),
    }
}

pub fn effective_program(invocation: &Invocation) -> String {
    let (program, _) = unwrap_helper(invocation);
    Path::new(program)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.to_string())
}

fn effective_args(invocation: &Invocation) -> Vec<String> {
    unwrap_helper(invocation).1.to_vec()
}

/// Boot sector signature and FAT32 type label, leaving the size untouched.
pub fn write_fat32_signature(path: &Path) -> std::io::Result<()> {
    let mut file = OpenOptions::new().write(true).open(path)?;
    file.seek(SeekFrom::Start(82))?;
    file.write_all(b"FAT32   ")?;
    file.seek(SeekFrom::Start(510))?;
    file.write_all(&[0x55, 0xAA])?;
    Ok(())
}

/// Directory of empty executables named after `tools`.
pub fn fake_tools(tools: &[&str]) -> TempDir {
    let dir = TempDir::new().unwrap();
    for tool in tools {
        let path = dir.path().join(tool);
        fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }
    dir
}

/// A GRUB source tree with configure.ac and auxiliary files but nothing generated.
pub fn source_workspace() -> TempDir {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("grub");
    fs::create_dir_all(source.join("build-aux")).unwrap();
    fs::create_dir_all(source.join("grub-core")).unwrap();
    fs::write(source.join("configure.ac"), "AC_INIT([GRUB],[2.12])\n").unwrap();
    fs::write(source.join("autogen.sh"), "#!/bin/sh\n").unwrap();
    fs::write(source.join("build-aux/config.sub"), "").unwrap();
    fs::create_dir_all(temp.path().join("config")).unwrap();
    fs::write(temp.path().join("config/grub.cfg"), "set timeout=3\n").unwrap();
    temp
}

pub fn context(root: &Path) -> ForgeContext {
    ForgeContext::new(root, ForgeConfig::default()).unwrap()
}

pub fn context_with(root: &Path, edit: impl FnOnce(&mut ForgeConfig)) -> ForgeContext {
    let mut config = ForgeConfig::default();
    edit(&mut config);
    ForgeContext::new(root, config).unwrap()
}

/// Every file below `root`, relative and sorted.
pub fn tree(root: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(&dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                stack.push(path.clone());
            }
            files.push(path.strip_prefix(root).unwrap().to_path_buf());
        }
    }
    files.sort();
    files
}

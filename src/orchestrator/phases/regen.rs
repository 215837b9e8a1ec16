//! Regeneration decision for autotools-generated build scripts.
//!
//! Generated files are compared against their sources by mtime. One run of
//! the primary procedure regenerates all of them; the thorough procedure
//! only runs when required auxiliary files are missing.

use super::{ensure_not_cancelled, ensure_parent, resolve_program};
use crate::config::ForgeContext;
use crate::error::BuildError;
use crate::models::ArtifactState;
use crate::orchestrator::CancelToken;
use crate::system::command::{CommandRunner, Invocation};
use std::path::{Path, PathBuf};

/// What a regeneration pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegenerationReport {
    /// Generated files that were absent or stale before the pass.
    pub regenerated: Vec<PathBuf>,
    /// Optional dependency lists created empty.
    pub created_optional: Vec<PathBuf>,
    pub primary_ran: bool,
    pub thorough_ran: bool,
}

impl RegenerationReport {
    pub fn is_noop(&self) -> bool {
        self.regenerated.is_empty()
            && self.created_optional.is_empty()
            && !self.primary_ran
            && !self.thorough_ran
    }
}

pub fn regenerate(
    ctx: &ForgeContext,
    runner: &dyn CommandRunner,
    cancel: &CancelToken,
) -> Result<RegenerationReport, BuildError> {
    let source_dir = &ctx.paths.source_dir;
    let regen = &ctx.config.regeneration;
    if !source_dir.is_dir() {
        return Err(BuildError::RegenerationFailed(format!(
            "source tree not found at {}",
            source_dir.display()
        )));
    }

    let mut report = RegenerationReport::default();
    let dry_run = runner.is_dry_run();

    for list in &regen.optional_lists {
        let path = source_dir.join(list);
        if path.exists() {
            continue;
        }
        if dry_run {
            log::info!("[Build] [DRY-RUN] Would create empty {}", path.display());
        } else {
            ensure_parent(&path)?;
            std::fs::write(&path, b"")?;
            log::info!("[Build] [REGEN] Created empty dependency list {}", path.display());
        }
        report.created_optional.push(path);
    }

    for pair in &regen.pairs {
        let generated = source_dir.join(&pair.generated);
        let state = ArtifactState::of(&generated, &source_dir.join(&pair.source));
        log::debug!("[Build] [REGEN] {} is {:?}", pair.generated.display(), state);
        if state.needs_regeneration() {
            report.regenerated.push(generated);
        }
    }

    if !report.regenerated.is_empty() {
        ensure_not_cancelled(cancel)?;
        log::info!(
            "[Build] [REGEN] {} generated file(s) out of date, running {}",
            report.regenerated.len(),
            regen.primary.join(" ")
        );
        run_procedure(&regen.primary, source_dir, runner, cancel)?;
        report.primary_ran = true;
    }

    if missing_auxiliary(source_dir, &regen.auxiliary).is_some() {
        ensure_not_cancelled(cancel)?;
        log::info!(
            "[Build] [REGEN] Auxiliary files missing, running {}",
            regen.thorough.join(" ")
        );
        run_procedure(&regen.thorough, source_dir, runner, cancel)?;
        report.thorough_ran = true;
    }

    if !dry_run {
        for pair in &regen.pairs {
            let generated = source_dir.join(&pair.generated);
            if !generated.exists() {
                return Err(BuildError::RegenerationFailed(format!(
                    "{} is still missing after regeneration",
                    generated.display()
                )));
            }
        }
        if let Some(aux) = missing_auxiliary(source_dir, &regen.auxiliary) {
            return Err(BuildError::RegenerationFailed(format!(
                "auxiliary file {} is still missing",
                aux.display()
            )));
        }
    }

    if report.is_noop() {
        log::info!("[Build] [REGEN] Generated build scripts are up to date");
    }
    Ok(report)
}

fn missing_auxiliary(source_dir: &Path, auxiliary: &[PathBuf]) -> Option<PathBuf> {
    auxiliary
        .iter()
        .map(|aux| source_dir.join(aux))
        .find(|path| !path.exists())
}

fn run_procedure(
    procedure: &[String],
    source_dir: &Path,
    runner: &dyn CommandRunner,
    cancel: &CancelToken,
) -> Result<(), BuildError> {
    let (program, args) = procedure.split_first().ok_or_else(|| {
        BuildError::RegenerationFailed("empty regeneration procedure".to_string())
    })?;

    let invocation = Invocation::new(resolve_program(program, source_dir))
        .args(args.iter().cloned())
        .current_dir(source_dir)
        .streamed();
    let output = runner.run(&invocation)?;
    ensure_not_cancelled(cancel)?;
    if !output.is_success() {
        return Err(BuildError::RegenerationFailed(format!(
            "{} failed with {}: {}",
            program,
            output.status_text(),
            output.diagnostic_tail()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ForgeConfig;
    use crate::error::CommandError;
    use crate::system::command::CommandOutput;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Pretends to be autogen.sh/autoreconf by creating their outputs.
    struct AutotoolsRunner {
        source_dir: PathBuf,
        calls: Mutex<Vec<String>>,
    }

    impl CommandRunner for AutotoolsRunner {
        fn run(&self, invocation: &Invocation) -> Result<CommandOutput, CommandError> {
            self.calls.lock().unwrap().push(invocation.program.clone());
            fs::write(self.source_dir.join("configure"), "#!/bin/sh\n").unwrap();
            if invocation.program == "autoreconf" {
                fs::create_dir_all(self.source_dir.join("build-aux")).unwrap();
                fs::write(self.source_dir.join("build-aux/config.sub"), "").unwrap();
            }
            Ok(CommandOutput::success())
        }
    }

    fn setup() -> (TempDir, ForgeContext, AutotoolsRunner) {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("grub");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("configure.ac"), "AC_INIT\n").unwrap();
        let ctx = ForgeContext::new(temp.path(), ForgeConfig::default()).unwrap();
        let runner = AutotoolsRunner {
            source_dir: ctx.paths.source_dir.clone(),
            calls: Mutex::new(Vec::new()),
        };
        (temp, ctx, runner)
    }

    #[test]
    fn test_regenerates_then_is_idempotent() {
        let (_temp, ctx, runner) = setup();
        let cancel = CancelToken::never();

        let first = regenerate(&ctx, &runner, &cancel).unwrap();
        assert!(first.primary_ran);
        assert!(first.thorough_ran);
        assert_eq!(first.created_optional.len(), 1);
        assert!(ctx.paths.source_dir.join("grub-core/extra_deps.lst").exists());

        let second = regenerate(&ctx, &runner, &cancel).unwrap();
        assert!(second.is_noop());
        assert_eq!(runner.calls.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_existing_optional_list_is_untouched() {
        let (_temp, ctx, runner) = setup();
        let list = ctx.paths.source_dir.join("grub-core/extra_deps.lst");
        fs::create_dir_all(list.parent().unwrap()).unwrap();
        fs::write(&list, "depends bli part_gpt\n").unwrap();

        let report = regenerate(&ctx, &runner, &CancelToken::never()).unwrap();
        assert!(report.created_optional.is_empty());
        assert_eq!(fs::read_to_string(&list).unwrap(), "depends bli part_gpt\n");
    }

    #[test]
    fn test_missing_source_tree_fails() {
        let temp = TempDir::new().unwrap();
        let ctx = ForgeContext::new(temp.path(), ForgeConfig::default()).unwrap();
        let runner = AutotoolsRunner {
            source_dir: ctx.paths.source_dir.clone(),
            calls: Mutex::new(Vec::new()),
        };
        let err = regenerate(&ctx, &runner, &CancelToken::never()).unwrap_err();
        assert!(matches!(err, BuildError::RegenerationFailed(_)));
        assert!(runner.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_generated_still_missing_is_an_error() {
        let (_temp, ctx, _runner) = setup();
        let runner = crate::system::command::ProcessRunner::new();
        let mut config = ctx.config.clone();
        config.regeneration.primary = vec!["true".to_string()];
        config.regeneration.thorough = vec!["true".to_string()];
        let ctx = ForgeContext::new(&ctx.paths.root, config).unwrap();

        let err = regenerate(&ctx, &runner, &CancelToken::never()).unwrap_err();
        assert!(err.to_string().contains("still missing"));
    }
}

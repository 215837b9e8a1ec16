//! Command-line front ends for `forge-build` and `forge-boot`.
//!
//! Both binaries share the same bootstrap: resolve the workspace, load and
//! validate `forge.toml`, install the log collector, then run the
//! orchestrator on a blocking worker while Ctrl-C flips the cancel channel.

use crate::config::{resolve_config, ForgeContext};
use crate::error::ForgeError;
use crate::log_collector::LogCollector;
use crate::orchestrator::{
    BootCommand, BootOrchestrator, BuildOrchestrator, BuildReport, BuildRequest, CancelToken,
    ImageOutcome,
};
use crate::system::command::{CommandRunner, DryRunRunner, ProcessRunner};
use crate::system::paths::find_workspace_root;
use clap::{ArgGroup, Args, Parser};
use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;

/// Options shared by both binaries.
#[derive(Args, Debug, Clone, Default)]
pub struct CommonArgs {
    /// Workspace root (default: nearest directory with forge.toml, else the current one)
    #[arg(long, value_name = "DIR")]
    pub workspace: Option<PathBuf>,

    /// Configuration file (default: <workspace>/forge.toml, then ~/.config/bootforge/forge.toml)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log every external command instead of running it
    #[arg(long)]
    pub dry_run: bool,

    /// Resolve required tools against this search path instead of $PATH
    #[arg(long = "path", value_name = "DIRS")]
    pub search_path: Option<OsString>,

    /// Debug output on the console
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Parser, Debug)]
#[command(
    name = "forge-build",
    version,
    about = "Cross-build GRUB and assemble the EFI firmware image"
)]
pub struct BuildCli {
    /// Explicit default action; same as giving no arguments
    #[arg(value_parser = ["default-build"])]
    pub action: Option<String>,

    /// Clean the tree (alone: clean only)
    #[arg(long)]
    pub clean: bool,

    /// Run `make install` after building
    #[arg(long)]
    pub install: bool,

    /// Assemble the EFI firmware image after building
    #[arg(long)]
    pub efi: bool,

    /// Clean, then build
    #[arg(long)]
    pub clean_build: bool,

    #[command(flatten)]
    pub common: CommonArgs,
}

impl BuildCli {
    pub fn request(&self) -> BuildRequest {
        let clean = self.clean || self.clean_build;
        let clean_only = self.clean
            && !self.clean_build
            && !self.install
            && !self.efi
            && self.action.is_none();
        BuildRequest {
            clean,
            build: !clean_only,
            install: self.install,
            efi: self.efi,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "forge-boot",
    version,
    about = "Stage the firmware image onto virtual media and boot it under QEMU",
    group(ArgGroup::new("boot_action").args(["full_run", "clean", "setup", "qemu"]).multiple(false))
)]
pub struct BootCli {
    /// Explicit default action: setup, then launch the emulator
    #[arg(value_parser = ["default-full-run"])]
    pub full_run: Option<String>,

    /// Remove the virtual media
    #[arg(long)]
    pub clean: bool,

    /// Create, format and populate the virtual media
    #[arg(long)]
    pub setup: bool,

    /// Launch the emulator with existing media
    #[arg(long)]
    pub qemu: bool,

    #[command(flatten)]
    pub common: CommonArgs,
}

impl BootCli {
    pub fn command(&self) -> BootCommand {
        if self.clean {
            BootCommand::Clean
        } else if self.setup {
            BootCommand::Setup
        } else if self.qemu {
            BootCommand::Qemu
        } else {
            BootCommand::FullRun
        }
    }
}

/// Everything a run needs once configuration is loaded.
pub struct Session {
    pub ctx: Arc<ForgeContext>,
    pub runner: Arc<dyn CommandRunner>,
    pub logger: LogCollector,
    pub search_path: Option<OsString>,
}

/// Resolve workspace and configuration, then start logging.
pub fn bootstrap(common: &CommonArgs, tool: &str) -> Result<Session, anyhow::Error> {
    let workspace = match common.workspace {
        Some(ref dir) => dir.clone(),
        None => find_workspace_root(&std::env::current_dir()?),
    };
    let (config, used) = resolve_config(common.config.as_deref(), &workspace)?;
    let ctx = ForgeContext::new(&workspace, config)?;

    let level = if common.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    let logger = LogCollector::new(&ctx.paths.log_dir, tool, level)
        .and_then(LogCollector::install)
        .map_err(anyhow::Error::msg)?;

    log::info!("[{}] bootforge {} in {}", tool, crate::VERSION, ctx.paths.root.display());
    match used {
        Some(path) => log::info!("[{}] Configuration: {}", tool, path.display()),
        None => log::info!("[{}] Configuration: built-in defaults", tool),
    }
    log::debug!("[{}] Full log: {}", tool, logger.session().full_log.display());

    let runner: Arc<dyn CommandRunner> = if common.dry_run {
        log::info!("[{}] [DRY-RUN] External commands will be logged, not run", tool);
        Arc::new(DryRunRunner::new())
    } else {
        Arc::new(ProcessRunner::new())
    };

    Ok(Session {
        ctx: Arc::new(ctx),
        runner,
        logger,
        search_path: common.search_path.clone(),
    })
}

/// Map a bootstrap failure to an exit code; config errors keep theirs.
fn bootstrap_exit_code(tool: &str, err: &anyhow::Error) -> i32 {
    println!("[{}] [ERROR] {:#}", tool, err);
    match err.downcast_ref::<ForgeError>() {
        Some(forge) => forge.exit_code(),
        None if err.downcast_ref::<crate::error::ConfigError>().is_some() => 4,
        None => 1,
    }
}

/// Flip the cancel channel on the first Ctrl-C.
fn spawn_interrupt_listener(tool: &'static str) -> CancelToken {
    let (cancel_tx, cancel) = CancelToken::channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("[{}] [CANCEL] Interrupt received, stopping after the current step", tool);
            let _ = cancel_tx.send(true);
        }
    });
    cancel
}

async fn finish(logger: &LogCollector, code: i32) -> i32 {
    if let Err(e) = logger.wait_for_empty().await {
        println!("[bootforge] [WARN] Failed to flush logs: {}", e);
    }
    code
}

pub async fn run_build(cli: BuildCli) -> i32 {
    const TOOL: &str = "forge-build";
    let session = match bootstrap(&cli.common, TOOL) {
        Ok(session) => session,
        Err(e) => return bootstrap_exit_code(TOOL, &e),
    };
    let request = cli.request();
    let cancel = spawn_interrupt_listener(TOOL);

    let Session {
        ctx,
        runner,
        logger,
        search_path,
    } = session;
    let joined = tokio::task::spawn_blocking(move || {
        let mut orchestrator = BuildOrchestrator::new(ctx, runner, cancel);
        if let Some(path) = search_path {
            orchestrator = orchestrator.with_search_path(path);
        }
        orchestrator.run(request)
    })
    .await;

    let code = match joined {
        Ok(Ok(report)) => {
            log_build_summary(&report);
            0
        }
        Ok(Err(e)) => {
            log::error!("[Build] [ERROR] {}", e);
            e.exit_code()
        }
        Err(e) => {
            log::error!("[Build] [ERROR] Build worker panicked: {}", e);
            1
        }
    };
    finish(&logger, code).await
}

fn log_build_summary(report: &BuildReport) {
    if let Some(ref cleaned) = report.cleaned {
        log::info!("[Build] [SUMMARY] Clean: {} path(s) removed", cleaned.removed.len());
    }
    if let Some(ref regen) = report.regeneration {
        log::info!(
            "[Build] [SUMMARY] Regeneration: {} file(s) regenerated, thorough={}",
            regen.regenerated.len(),
            regen.thorough_ran
        );
    }
    if let Some(outcome) = report.configure {
        log::info!("[Build] [SUMMARY] Configure: {:?}", outcome);
    }
    if report.built {
        log::info!("[Build] [SUMMARY] Build: ok, install: {}", report.installed);
    }
    match report.image {
        Some(ImageOutcome::Assembled { ref blob, .. }) => {
            log::info!("[Build] [SUMMARY] Firmware blob: {}", blob.display())
        }
        Some(ImageOutcome::Skipped { ref reason }) => {
            log::warn!("[Build] [SUMMARY] Firmware blob skipped: {}", reason)
        }
        None => {}
    }
}

pub async fn run_boot(cli: BootCli) -> i32 {
    const TOOL: &str = "forge-boot";
    let session = match bootstrap(&cli.common, TOOL) {
        Ok(session) => session,
        Err(e) => return bootstrap_exit_code(TOOL, &e),
    };
    let command = cli.command();
    let cancel = spawn_interrupt_listener(TOOL);

    let Session {
        ctx,
        runner,
        logger,
        search_path,
    } = session;
    // exec and the pre-exec log flush both block, so launch stays on the worker.
    let joined = tokio::task::spawn_blocking(move || {
        let mut orchestrator = BootOrchestrator::new(ctx, runner, cancel);
        if let Some(path) = search_path {
            orchestrator = orchestrator.with_search_path(path);
        }
        let report = orchestrator.prepare(command)?;
        if let Some(ref staged) = report.staged {
            log::info!(
                "[Media] [SUMMARY] disk created: {}, image formatted: {}, populated: {}",
                staged.disk_created,
                staged.image_formatted,
                staged.populated
            );
        }
        orchestrator.launch(&report)
    })
    .await;

    let result = match joined {
        Ok(result) => result,
        Err(e) => {
            log::error!("[Boot] [ERROR] Boot worker panicked: {}", e);
            return finish(&logger, 1).await;
        }
    };

    let code = match result {
        Ok(()) => 0,
        Err(e) => {
            log::error!("[Boot] [ERROR] {}", e);
            e.exit_code()
        }
    };
    finish(&logger, code).await
}

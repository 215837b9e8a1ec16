//! Build and boot orchestration.
//!
//! `BuildOrchestrator`: Gate -> Regenerate -> Configure -> Build -> (Install) -> (Assemble)
//! `BootOrchestrator`: media Gate -> MediaStager -> emulator Gate -> EmulatorLauncher
//!
//! Both run synchronously on a blocking worker. Cancellation arrives through a
//! tokio `watch` channel and is polled between steps.

pub mod phases;
pub mod state;

pub use phases::{
    ConfigureOutcome, DependencyGate, GateReport, ImageOutcome, RegenerationReport,
};
pub use state::{PipelinePhase, PipelineState};

use crate::config::ForgeContext;
use crate::emulator::{self, LaunchPlan};
use crate::error::{BuildError, ForgeError, MediaError, Result};
use crate::media::{MediaStager, StageReport};
use crate::system::command::CommandRunner;
use std::ffi::OsString;
use std::sync::Arc;
use tokio::sync::watch;

/// Read side of the operator cancellation channel.
#[derive(Clone, Debug)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn new(rx: watch::Receiver<bool>) -> Self {
        CancelToken { rx }
    }

    /// Sender and token pair; send `true` to cancel.
    pub fn channel() -> (watch::Sender<bool>, CancelToken) {
        let (tx, rx) = watch::channel(false);
        (tx, CancelToken { rx })
    }

    /// A token that is never cancelled.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        CancelToken { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }
}

/// Which build stages to run, decoded from `forge-build` flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BuildRequest {
    pub clean: bool,
    pub build: bool,
    pub install: bool,
    pub efi: bool,
}

impl BuildRequest {
    pub fn default_build() -> Self {
        BuildRequest {
            build: true,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BuildReport {
    pub cleaned: Option<phases::CleanReport>,
    pub gate: Option<GateReport>,
    pub regeneration: Option<RegenerationReport>,
    pub configure: Option<ConfigureOutcome>,
    pub built: bool,
    pub installed: bool,
    pub image: Option<ImageOutcome>,
}

pub struct BuildOrchestrator {
    ctx: Arc<ForgeContext>,
    runner: Arc<dyn CommandRunner>,
    cancel: CancelToken,
    search_path: Option<OsString>,
    state: PipelineState,
}

impl BuildOrchestrator {
    pub fn new(
        ctx: Arc<ForgeContext>,
        runner: Arc<dyn CommandRunner>,
        cancel: CancelToken,
    ) -> Self {
        BuildOrchestrator {
            ctx,
            runner,
            cancel,
            search_path: None,
            state: PipelineState::new(),
        }
    }

    /// Resolve gate tools against this path instead of `$PATH`.
    pub fn with_search_path(mut self, search_path: impl Into<OsString>) -> Self {
        self.search_path = Some(search_path.into());
        self
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    fn transition(&mut self, next: PipelinePhase) -> std::result::Result<(), BuildError> {
        self.state
            .transition_to(next)
            .map_err(|e| BuildError::Io(std::io::Error::other(e)))?;
        if !next.is_terminal() {
            log::debug!("[Build] [PHASE] Entering {}", next);
        }
        Ok(())
    }

    pub fn run(&mut self, request: BuildRequest) -> Result<BuildReport> {
        match self.run_stages(request) {
            Ok(report) => {
                self.transition(PipelinePhase::Completed)?;
                crate::log_milestone!(
                    "[Build] Pipeline completed in {:.1}s",
                    self.state.elapsed_since_start().as_secs_f64()
                );
                Ok(report)
            }
            Err(e) => {
                crate::log_milestone!("[Build] Pipeline failed during {}: {}", self.state.phase, e);
                self.state.record_error(e.to_string());
                Err(e.into())
            }
        }
    }

    fn run_stages(
        &mut self,
        request: BuildRequest,
    ) -> std::result::Result<BuildReport, BuildError> {
        let ctx = Arc::clone(&self.ctx);
        let runner = Arc::clone(&self.runner);
        let runner = runner.as_ref();
        let mut report = BuildReport::default();

        if request.clean {
            self.transition(PipelinePhase::Clean)?;
            report.cleaned = Some(phases::clean(&ctx, runner)?);
            crate::log_milestone!("[Build] Tree cleaned");
            if !request.build {
                return Ok(report);
            }
        }

        self.transition(PipelinePhase::Gate)?;
        let mut gate = DependencyGate::for_build(&ctx);
        if let Some(ref path) = self.search_path {
            gate = gate.with_search_path(path.clone());
        }
        report.gate = Some(gate.check()?);
        phases::ensure_not_cancelled(&self.cancel)?;

        self.transition(PipelinePhase::Regenerate)?;
        report.regeneration = Some(phases::regenerate(&ctx, runner, &self.cancel)?);

        self.transition(PipelinePhase::Configure)?;
        let outcome = phases::configure(&ctx, runner, &self.cancel)?;
        crate::log_milestone!("[Build] Configure: {:?}", outcome);
        report.configure = Some(outcome);

        self.transition(PipelinePhase::Build)?;
        phases::build(&ctx, runner, &self.cancel)?;
        report.built = true;
        crate::log_milestone!("[Build] Compilation finished");

        if request.install {
            self.transition(PipelinePhase::Install)?;
            phases::install(&ctx, runner, &self.cancel)?;
            report.installed = true;
            crate::log_milestone!("[Build] Installed into {}", ctx.paths.install_dir.display());
        }

        if request.efi {
            self.transition(PipelinePhase::Assemble)?;
            let image = phases::assemble(&ctx, runner, &self.cancel)?;
            if let ImageOutcome::Assembled { ref blob, modules } = image {
                crate::log_milestone!(
                    "[Build] Firmware blob {} assembled with {} modules",
                    blob.display(),
                    modules
                );
            }
            report.image = Some(image);
        }

        Ok(report)
    }
}

/// `forge-boot` actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootCommand {
    /// Setup then launch.
    FullRun,
    Clean,
    Setup,
    Qemu,
}

/// What a boot run did before any exec.
#[derive(Debug, Clone, Default)]
pub struct BootReport {
    pub cleaned: Vec<std::path::PathBuf>,
    pub staged: Option<StageReport>,
    pub plan: Option<LaunchPlan>,
}

pub struct BootOrchestrator {
    ctx: Arc<ForgeContext>,
    runner: Arc<dyn CommandRunner>,
    cancel: CancelToken,
    search_path: Option<OsString>,
}

impl BootOrchestrator {
    pub fn new(
        ctx: Arc<ForgeContext>,
        runner: Arc<dyn CommandRunner>,
        cancel: CancelToken,
    ) -> Self {
        BootOrchestrator {
            ctx,
            runner,
            cancel,
            search_path: None,
        }
    }

    pub fn with_search_path(mut self, search_path: impl Into<OsString>) -> Self {
        self.search_path = Some(search_path.into());
        self
    }

    fn gate(&self, gate: DependencyGate) -> std::result::Result<GateReport, BuildError> {
        match self.search_path {
            Some(ref path) => gate.with_search_path(path.clone()).check(),
            None => gate.check(),
        }
    }

    /// Everything up to the emulator launch; returns the plan to exec.
    ///
    /// Kept separate from [`launch`](Self::launch) so callers (and tests) can
    /// inspect the plan without replacing the process.
    pub fn prepare(&self, command: BootCommand) -> Result<BootReport> {
        let ctx = self.ctx.as_ref();
        let runner = self.runner.as_ref();
        let mut report = BootReport::default();

        if command == BootCommand::Clean {
            let stager = MediaStager::new(ctx, runner, &self.cancel);
            report.cleaned = stager.clean()?;
            crate::log_milestone!("[Media] Removed {} media artifact(s)", report.cleaned.len());
            return Ok(report);
        }

        if matches!(command, BootCommand::Setup | BootCommand::FullRun) {
            self.gate(DependencyGate::for_media(ctx))?;
            let mut stager = MediaStager::new(ctx, runner, &self.cancel);
            report.staged = Some(stager.stage()?);
        }

        if matches!(command, BootCommand::Qemu | BootCommand::FullRun) {
            if self.cancel.is_cancelled() {
                return Err(ForgeError::Media(MediaError::Cancelled));
            }
            let plan = emulator::plan(ctx)?;
            self.gate(DependencyGate::for_emulator(ctx))?;
            report.plan = Some(plan);
        }

        Ok(report)
    }

    /// Replace the process with the emulator when the report carries a plan.
    ///
    /// Under `--dry-run` the invocation is only recorded.
    pub fn launch(&self, report: &BootReport) -> Result<()> {
        let Some(ref plan) = report.plan else {
            return Ok(());
        };
        if self.runner.is_dry_run() {
            self.runner
                .run(&plan.invocation)
                .map_err(|e| ForgeError::Build(BuildError::Command(e)))?;
            return Ok(());
        }
        Err(emulator::launch(plan).into())
    }
}

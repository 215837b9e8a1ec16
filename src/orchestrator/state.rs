//! Pipeline phase tracking for the build orchestrator.
//!
//! - `PipelinePhase`: discrete stages of one `forge-build` run
//! - `PipelineState`: current phase, visited phases, timing and error
//!
//! Transitions are validated so no stage can start after a predecessor
//! failed or was skipped.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelinePhase {
    /// Nothing has run yet
    Pending,

    /// `make distclean` and removal of derived state
    Clean,

    /// Host tool and cross-compiler resolution
    Gate,

    /// Generated build scripts brought up to date
    Regenerate,

    /// External configure step and configuration stamp
    Configure,

    /// Parallel compilation
    Build,

    /// `make install` into the prefix
    Install,

    /// Firmware blob assembly
    Assemble,

    Completed,

    Failed,
}

impl PipelinePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelinePhase::Pending => "pending",
            PipelinePhase::Clean => "clean",
            PipelinePhase::Gate => "gate",
            PipelinePhase::Regenerate => "regenerate",
            PipelinePhase::Configure => "configure",
            PipelinePhase::Build => "build",
            PipelinePhase::Install => "install",
            PipelinePhase::Assemble => "assemble",
            PipelinePhase::Completed => "completed",
            PipelinePhase::Failed => "failed",
        }
    }

    /// Get all valid phase transitions FROM this phase.
    pub fn valid_next_phases(&self) -> Vec<PipelinePhase> {
        use PipelinePhase::*;
        match self {
            Pending => vec![Clean, Gate, Failed],
            Clean => vec![Gate, Completed, Failed],
            Gate => vec![Regenerate, Failed],
            Regenerate => vec![Configure, Failed],
            Configure => vec![Build, Failed],
            Build => vec![Install, Assemble, Completed, Failed],
            Install => vec![Assemble, Completed, Failed],
            Assemble => vec![Completed, Failed],
            Completed => vec![],
            Failed => vec![],
        }
    }

    pub fn can_transition_to(&self, next: PipelinePhase) -> bool {
        self.valid_next_phases().contains(&next)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelinePhase::Completed | PipelinePhase::Failed)
    }
}

impl std::fmt::Display for PipelinePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution state snapshot of one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineState {
    pub phase: PipelinePhase,

    /// Every phase entered, in order
    pub history: Vec<PipelinePhase>,

    pub start_time: SystemTime,

    pub last_update_time: SystemTime,

    /// Error message if a phase failed
    pub error: Option<String>,
}

impl Default for PipelineState {
    fn default() -> Self {
        PipelineState::new()
    }
}

impl PipelineState {
    pub fn new() -> Self {
        let now = SystemTime::now();
        PipelineState {
            phase: PipelinePhase::Pending,
            history: Vec::new(),
            start_time: now,
            last_update_time: now,
            error: None,
        }
    }

    /// Attempt to transition to the next phase.
    pub fn transition_to(&mut self, next_phase: PipelinePhase) -> Result<(), String> {
        if !self.phase.can_transition_to(next_phase) {
            return Err(format!(
                "Invalid phase transition: {} -> {}",
                self.phase.as_str(),
                next_phase.as_str()
            ));
        }
        self.phase = next_phase;
        self.history.push(next_phase);
        self.last_update_time = SystemTime::now();
        Ok(())
    }

    /// Record an error and mark the run as failed.
    pub fn record_error(&mut self, error: String) {
        self.error = Some(error);
        if !self.phase.is_terminal() {
            self.phase = PipelinePhase::Failed;
            self.history.push(PipelinePhase::Failed);
        }
        self.last_update_time = SystemTime::now();
    }

    pub fn visited(&self, phase: PipelinePhase) -> bool {
        self.history.contains(&phase)
    }

    pub fn elapsed_since_start(&self) -> std::time::Duration {
        self.start_time.elapsed().unwrap_or_default()
    }
}

//! bootforge: cross-build a GRUB EFI bootloader, stage it onto virtual
//! media, and boot it under QEMU.
//!
//! The system is organized into functional modules:
//! - **error**: Unified error type hierarchy and exit codes
//! - **models**: Core data types (architectures, manifests, media, stamps)
//! - **system**: Process execution, privilege, tool resolution, workspace paths
//! - **config**: `forge.toml` loading and the validated run context
//! - **log_collector**: Console echo plus full and milestone log files
//! - **orchestrator**: Build pipeline phases and the boot sequence
//! - **media**: Virtual disk and FAT32 boot image staging
//! - **emulator**: QEMU launch planning and exec
//! - **cli**: `forge-build` and `forge-boot` front ends

pub mod error;
pub mod models;

// OS abstraction: commands, privilege, paths
pub mod system;

pub mod config;

pub mod log_collector;

pub mod orchestrator;

pub mod media;

pub mod emulator;

pub mod cli;

// Re-export the log crate for macro usage
pub use log;

pub use config::{ForgeConfig, ForgeContext};
pub use error::{ForgeError, Result};
pub use log_collector::{LogCollector, LogLine};
pub use orchestrator::{BootOrchestrator, BuildOrchestrator, CancelToken};

/// Crate version, reported at the start of every run.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

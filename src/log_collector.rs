//! Decoupled logging pipeline for forge runs.
//!
//! ```text
//! log::info!() / log_milestone!()
//!     |
//! [LogCollector] (non-blocking send)
//!     | crossbeam unbounded channel
//!     v
//! [persister thread] -> console (stdout, every level)
//!                    -> logs/full/<ts>_<tool>_full.log
//!                    -> logs/milestones/<ts>_<tool>_milestones.log
//! ```
//!
//! Every record lands in the full log. Records with target `milestone`
//! (stage boundaries and outcomes) are copied to the milestones log too.

use chrono::Local;
use crossbeam_channel::{unbounded, Sender};
use log::{Level, LevelFilter, Log, Metadata, Record};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Target used by `log_milestone!`.
pub const MILESTONE_TARGET: &str = "milestone";

enum LogMessage {
    Line(LogLine),
    /// Flush marker; the sender is signalled once everything before it is on disk.
    Flush(std::sync::mpsc::Sender<()>),
}

/// A log line with metadata.
#[derive(Clone, Debug)]
pub struct LogLine {
    pub message: String,
    pub level: Level,
    pub milestone: bool,
    /// HH:MM:SS.mmm at creation time.
    pub timestamp: String,
}

impl LogLine {
    pub fn new(level: Level, message: String) -> Self {
        LogLine {
            message,
            level,
            milestone: false,
            timestamp: Local::now().format("%H:%M:%S%.3f").to_string(),
        }
    }

    pub fn milestone(message: String) -> Self {
        LogLine {
            milestone: true,
            ..LogLine::new(Level::Info, message)
        }
    }

    fn formatted(&self) -> String {
        format!("[{}] [{}] {}\n", self.timestamp, self.level, self.message)
    }
}

/// Session log files for one run.
#[derive(Clone, Debug)]
pub struct LogSession {
    pub full_log: PathBuf,
    pub milestone_log: PathBuf,
}

impl LogSession {
    fn create(log_dir: &Path, tool: &str) -> Result<Self, String> {
        let full_dir = log_dir.join("full");
        let milestone_dir = log_dir.join("milestones");
        std::fs::create_dir_all(&full_dir)
            .map_err(|e| format!("Failed to create full log dir: {}", e))?;
        std::fs::create_dir_all(&milestone_dir)
            .map_err(|e| format!("Failed to create milestone log dir: {}", e))?;

        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        Ok(LogSession {
            full_log: full_dir.join(format!("{}_{}_full.log", stamp, tool)),
            milestone_log: milestone_dir.join(format!("{}_{}_milestones.log", stamp, tool)),
        })
    }
}

/// Unified logger writing to the console and the session files.
#[derive(Clone)]
pub struct LogCollector {
    tx: Sender<LogMessage>,
    console_level: LevelFilter,
    session: LogSession,
}

impl LogCollector {
    /// Create the session files and start the persister thread.
    ///
    /// `tool` names the binary (`forge-build`, `forge-boot`) in file names.
    pub fn new(log_dir: &Path, tool: &str, console_level: LevelFilter) -> Result<Self, String> {
        Self::with_console(log_dir, tool, console_level, Box::new(std::io::stdout()))
    }

    /// Like [`new`](Self::new), echoing console lines to `console` instead of stdout.
    pub fn with_console(
        log_dir: &Path,
        tool: &str,
        console_level: LevelFilter,
        mut console: Box<dyn Write + Send>,
    ) -> Result<Self, String> {
        let session = LogSession::create(log_dir, tool)?;
        let mut full = open_append(&session.full_log)?;
        let mut milestones = open_append(&session.milestone_log)?;

        let (tx, rx) = unbounded::<LogMessage>();

        // A plain OS thread so records from spawn_blocking workers and the
        // async runtime reach disk the same way.
        std::thread::spawn(move || {
            while let Ok(msg) = rx.recv() {
                match msg {
                    LogMessage::Line(line) => {
                        let formatted = line.formatted();
                        if line.level <= console_level {
                            let _ = console.write_all(formatted.as_bytes());
                        }
                        let _ = full.write_all(formatted.as_bytes());
                        if line.milestone {
                            let _ = milestones.write_all(formatted.as_bytes());
                        }
                    }
                    LogMessage::Flush(done) => {
                        let _ = full.flush();
                        let _ = milestones.flush();
                        let _ = full.sync_data();
                        let _ = milestones.sync_data();
                        let _ = console.flush();
                        let _ = done.send(());
                    }
                }
            }
        });

        Ok(LogCollector {
            tx,
            console_level,
            session,
        })
    }

    /// Install as the process-wide `log` backend.
    pub fn install(self) -> Result<Self, String> {
        let handle = self.clone();
        log::set_boxed_logger(Box::new(self))
            .map_err(|e| format!("Logger already installed: {}", e))?;
        log::set_max_level(LevelFilter::Debug);
        Ok(handle)
    }

    pub fn session(&self) -> &LogSession {
        &self.session
    }

    pub fn console_level(&self) -> LevelFilter {
        self.console_level
    }

    /// Send a log line (non-blocking, cannot fail).
    pub fn log_line(&self, line: LogLine) {
        let _ = self.tx.send(LogMessage::Line(line));
    }

    /// Block until every line sent before this call has been written.
    pub fn flush_blocking(&self) -> Result<(), String> {
        let (tx, rx) = std::sync::mpsc::channel::<()>();
        self.tx
            .send(LogMessage::Flush(tx))
            .map_err(|e| format!("Failed to send flush marker: {}", e))?;
        rx.recv()
            .map_err(|e| format!("Flush signal interrupted: {}", e))
    }

    /// Async wrapper around [`flush_blocking`](Self::flush_blocking) for the
    /// binaries' shutdown path.
    pub async fn wait_for_empty(&self) -> Result<(), String> {
        let collector = self.clone();
        tokio::task::spawn_blocking(move || collector.flush_blocking())
            .await
            .map_err(|e| format!("Flush task failed: {}", e))?
    }
}

impl Log for LogCollector {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Debug
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let message = record.args().to_string();
        if record.target() == MILESTONE_TARGET {
            let mut line = LogLine::milestone(message);
            line.level = record.level();
            self.log_line(line);
        } else {
            self.log_line(LogLine::new(record.level(), message));
        }
    }

    fn flush(&self) {
        let _ = self.flush_blocking();
    }
}

fn open_append(path: &Path) -> Result<File, String> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| format!("Failed to open log file {}: {}", path.display(), e))
}

//! Typed external-process invocation.
//!
//! Every stage talks to the outside world through [`CommandRunner`]. An
//! [`Invocation`] is a plain value (program, argv, cwd, explicit env), and a
//! run always yields a [`CommandOutput`] with the exit code and captured
//! output instead of relying on shell substitution.

use crate::error::CommandError;
use crossbeam_channel::unbounded;
use std::collections::BTreeMap;
use std::fmt;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Mutex;

/// Lines of stderr kept when summarizing a failure.
const DIAGNOSTIC_TAIL_LINES: usize = 20;

/// A single external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Variables added on top of the inherited environment for this call only.
    pub env: BTreeMap<String, String>,
    /// Forward output to the log line by line while the process runs.
    pub stream: bool,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Invocation {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: BTreeMap::new(),
            stream: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.to_string_lossy().into_owned())
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn streamed(mut self) -> Self {
        self.stream = true;
        self
    }

    /// Build the std `Command` for this invocation.
    pub fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        if let Some(ref dir) = self.cwd {
            command.current_dir(dir);
        }
        command.envs(&self.env);
        command
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in &self.env {
            write!(f, "{}={:?} ", key, value)?;
        }
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.contains(' ') || arg.is_empty() {
                write!(f, " {:?}", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Structured result of a finished process.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    /// Exit code, `None` when terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success() -> Self {
        CommandOutput {
            code: Some(0),
            ..Default::default()
        }
    }

    pub fn failure(code: i32, stderr: impl Into<String>) -> Self {
        CommandOutput {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == Some(0)
    }

    /// The external diagnostic: stderr, or stdout when stderr is empty.
    pub fn diagnostic(&self) -> String {
        let text = if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        text.trim_end().to_string()
    }

    /// Last lines of the diagnostic, for long build logs.
    pub fn diagnostic_tail(&self) -> String {
        let diagnostic = self.diagnostic();
        let lines: Vec<&str> = diagnostic.lines().collect();
        let start = lines.len().saturating_sub(DIAGNOSTIC_TAIL_LINES);
        lines[start..].join("\n")
    }

    /// Human-readable exit status.
    pub fn status_text(&self) -> String {
        match self.code {
            Some(code) => format!("exit code {}", code),
            None => "terminated by signal".to_string(),
        }
    }
}

/// Executes invocations. Implementations must be usable from a blocking worker.
pub trait CommandRunner: Send + Sync {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput, CommandError>;

    /// True when invocations are only recorded; stages then skip their own
    /// filesystem writes as well.
    fn is_dry_run(&self) -> bool {
        false
    }
}

/// Runs real processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        ProcessRunner
    }

    fn run_captured(&self, invocation: &Invocation) -> Result<CommandOutput, CommandError> {
        let output = invocation
            .to_command()
            .stdin(Stdio::null())
            .output()
            .map_err(|source| CommandError::Spawn {
                program: invocation.program.clone(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !stdout.is_empty() {
            log::debug!("[{}] stdout: {}", invocation.program, stdout.trim_end());
        }
        if !stderr.is_empty() {
            log::debug!("[{}] stderr: {}", invocation.program, stderr.trim_end());
        }

        Ok(CommandOutput {
            code: output.status.code(),
            stdout,
            stderr,
        })
    }

    /// Spawn with piped output; two reader threads feed one channel so lines
    /// reach the log in arrival order while both streams are captured.
    fn run_streamed(&self, invocation: &Invocation) -> Result<CommandOutput, CommandError> {
        let mut child = invocation
            .to_command()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| CommandError::Spawn {
                program: invocation.program.clone(),
                source,
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CommandError::Pipe(invocation.program.clone()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| CommandError::Pipe(invocation.program.clone()))?;

        let (tx, rx) = unbounded::<(bool, String)>();
        let stdout_reader = spawn_line_reader(stdout, false, tx.clone());
        let stderr_reader = spawn_line_reader(stderr, true, tx);

        let mut captured_stdout = String::new();
        let mut captured_stderr = String::new();
        // Ends once both reader threads have dropped their senders.
        for (is_stderr, line) in rx.iter() {
            if is_stderr {
                log::info!("[{}] [STDERR] {}", invocation.program, line);
                captured_stderr.push_str(&line);
                captured_stderr.push('\n');
            } else {
                log::info!("[{}] {}", invocation.program, line);
                captured_stdout.push_str(&line);
                captured_stdout.push('\n');
            }
        }
        let _ = stdout_reader.join();
        let _ = stderr_reader.join();

        let status = child.wait().map_err(|source| CommandError::Wait {
            program: invocation.program.clone(),
            source,
        })?;

        Ok(CommandOutput {
            code: status.code(),
            stdout: captured_stdout,
            stderr: captured_stderr,
        })
    }
}

fn spawn_line_reader<R: Read + Send + 'static>(
    stream: R,
    is_stderr: bool,
    tx: crossbeam_channel::Sender<(bool, String)>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        for line in BufReader::new(stream).lines() {
            match line {
                Ok(line) => {
                    if tx.send((is_stderr, line)).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    })
}

impl CommandRunner for ProcessRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput, CommandError> {
        log::debug!("[Exec] {}", invocation);
        if invocation.stream {
            self.run_streamed(invocation)
        } else {
            self.run_captured(invocation)
        }
    }
}

/// Logs each invocation instead of executing it and reports success.
///
/// Backs `--dry-run`; the recorded list is also handy for inspecting a plan.
#[derive(Debug, Default)]
pub struct DryRunRunner {
    recorded: Mutex<Vec<Invocation>>,
}

impl DryRunRunner {
    pub fn new() -> Self {
        DryRunRunner::default()
    }

    pub fn recorded(&self) -> Vec<Invocation> {
        self.recorded
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

impl CommandRunner for DryRunRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput, CommandError> {
        log::info!("[DRY-RUN] {}", invocation);
        if let Ok(mut recorded) = self.recorded.lock() {
            recorded.push(invocation.clone());
        }
        Ok(CommandOutput::success())
    }

    fn is_dry_run(&self) -> bool {
        true
    }
}

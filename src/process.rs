#![forbid(unsafe_code)]

//! Thin wrapper around `tokio::process` used for every external tool call.
//!
//! Each invocation captures stdout/stderr and the exit status, and is bounded
//! by a deadline. Every tool leads its own process group. An elapsed
//! deadline or a dropped request future kills the whole group, so helpers a
//! tool spawned itself (yt-dlp's ffmpeg merger) go down with it.

use std::{
    borrow::Cow,
    ffi::{OsStr, OsString},
    io,
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
    time::{Duration, Instant},
};

use nix::{
    errno::Errno,
    sys::signal::{Signal, killpg},
    unistd::Pid,
};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

const STDERR_SUMMARY_LIMIT: usize = 300;

#[derive(Debug, Error)]
pub enum ProcessError {
    /// `program` stays out of the message; it is a server-side path.
    #[error("failed to launch {label}: {source}")]
    Spawn {
        label: &'static str,
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("{label} did not finish within {deadline:?}")]
    Timeout {
        label: &'static str,
        deadline: Duration,
    },
    #[error("waiting for {label} failed: {source}")]
    Wait {
        label: &'static str,
        #[source]
        source: io::Error,
    },
}

/// A fully described tool invocation.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    label: &'static str,
    program: PathBuf,
    args: Vec<OsString>,
}

impl ToolCommand {
    pub fn new(label: &'static str, program: impl Into<PathBuf>) -> Self {
        Self {
            label,
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(&mut self, arg: impl AsRef<OsStr>) -> &mut Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|arg| arg.as_ref().to_os_string()));
        self
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Arguments rendered for logs and assertions.
    pub fn display_args(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect()
    }

    /// Spawns the tool and waits for it, killing it once `deadline` elapses.
    pub async fn run(&self, deadline: Duration) -> Result<ToolOutput, ProcessError> {
        debug!(
            tool = self.label,
            program = %self.program.display(),
            args = ?self.display_args(),
            "spawning tool"
        );
        let started = Instant::now();
        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| {
                warn!(
                    tool = self.label,
                    program = %self.program.display(),
                    error = %source,
                    "failed to launch tool"
                );
                ProcessError::Spawn {
                    label: self.label,
                    program: self.program.display().to_string(),
                    source,
                }
            })?;
        // Kills the group if the caller drops this future mid-wait.
        let mut group = ProcessGroup::new(self.label, child.id());

        let output = match tokio::time::timeout(deadline, child.wait_with_output()).await {
            Ok(result) => {
                group.disarm();
                result.map_err(|source| ProcessError::Wait {
                    label: self.label,
                    source,
                })?
            }
            Err(_) => {
                group.kill();
                warn!(
                    tool = self.label,
                    deadline_ms = deadline.as_millis() as u64,
                    "tool exceeded its deadline, killed"
                );
                return Err(ProcessError::Timeout {
                    label: self.label,
                    deadline,
                });
            }
        };

        let elapsed = started.elapsed();
        debug!(
            tool = self.label,
            status = %output.status,
            elapsed_ms = elapsed.as_millis() as u64,
            "tool finished"
        );
        Ok(ToolOutput {
            status: output.status,
            stdout: output.stdout,
            stderr: output.stderr,
            elapsed,
        })
    }
}

/// Kills the process group led by a spawned tool unless disarmed. The
/// leader has the group id of its own pid, see `process_group(0)`.
struct ProcessGroup {
    label: &'static str,
    pgid: Option<Pid>,
}

impl ProcessGroup {
    fn new(label: &'static str, pid: Option<u32>) -> Self {
        Self {
            label,
            pgid: pid
                .and_then(|pid| i32::try_from(pid).ok())
                .map(Pid::from_raw),
        }
    }

    /// The leader exited on its own; its group id may be reused from now on.
    fn disarm(&mut self) {
        self.pgid = None;
    }

    fn kill(&mut self) {
        let Some(pgid) = self.pgid.take() else {
            return;
        };
        match killpg(pgid, Signal::SIGKILL) {
            Ok(()) => debug!(tool = self.label, pgid = pgid.as_raw(), "killed process group"),
            Err(Errno::ESRCH) => {}
            Err(err) => warn!(
                tool = self.label,
                pgid = pgid.as_raw(),
                error = %err,
                "failed to kill process group"
            ),
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Captured result of a finished tool.
#[derive(Debug)]
pub struct ToolOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub elapsed: Duration,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// `None` when the process was terminated by a signal.
    pub fn exit_code(&self) -> Option<i32> {
        self.status.code()
    }

    pub fn stdout_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stdout)
    }

    pub fn stderr_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stderr)
    }

    /// Last meaningful stderr line, which is where yt-dlp and ffmpeg put the
    /// actual error. Falls back to the exit status when stderr is empty.
    pub fn stderr_summary(&self) -> String {
        let stderr = self.stderr_text();
        let line = stderr
            .lines()
            .map(str::trim)
            .rev()
            .find(|line| !line.is_empty())
            .map(|line| line.strip_prefix("ERROR:").unwrap_or(line).trim());
        match line {
            Some(line) if line.chars().count() > STDERR_SUMMARY_LIMIT => {
                let mut capped: String = line.chars().take(STDERR_SUMMARY_LIMIT).collect();
                capped.push('…');
                capped
            }
            Some(line) => line.to_string(),
            None => format!("exited with {}", self.status),
        }
    }
}

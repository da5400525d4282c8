//! Bounded one-shot command execution.
//!
//! Used for test runners, dependency installs and `git`. Long-lived services
//! go through the [`ProcessSupervisor`](super::ProcessSupervisor) instead.

use super::signal::{force_kill, isolate, send_terminate, GroupGuard};
use super::CommandSpec;
use crate::errors::SpawnError;
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, warn};

/// How long to keep draining pipes after the child is gone.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Default time a timed-out command gets between SIGTERM and SIGKILL.
const DEFAULT_TERMINATE_GRACE: Duration = Duration::from_secs(5);

/// Captured result of a finished (or killed) command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Standard output, lossily decoded.
    pub stdout: String,
    /// Standard error, lossily decoded.
    pub stderr: String,
    /// Exit code; `None` if killed by a signal or on timeout.
    pub exit_code: Option<i32>,
    /// Whether the command was killed for exceeding its timeout.
    pub timed_out: bool,
    /// Wall-clock time the command ran.
    pub duration: Duration,
}

impl CommandOutput {
    /// Creates an output from its parts, for fakes and tests.
    #[must_use]
    pub fn new(stdout: impl Into<String>, stderr: impl Into<String>, exit_code: Option<i32>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code,
            timed_out: false,
            duration: Duration::ZERO,
        }
    }

    /// Returns true if the command exited with code 0 before the timeout.
    #[must_use]
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// Stdout followed by stderr.
    #[must_use]
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            return self.stdout.clone();
        }
        format!("{}\n{}", self.stdout, self.stderr)
    }

    /// Writes the combined output to `path`, creating parent directories.
    pub fn write_log(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.combined())
    }
}

/// Runs a command to completion with a timeout.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Executes `cmd`, killing it if it runs longer than `timeout`.
    ///
    /// A non-zero exit or a timeout is a normal [`CommandOutput`]; only a
    /// failure to launch is an error.
    async fn run(&self, cmd: &CommandSpec, timeout: Duration) -> Result<CommandOutput, SpawnError>;
}

/// [`CommandRunner`] backed by `tokio::process`.
///
/// Each command runs in its own process group. On timeout the whole group
/// gets SIGTERM, then SIGKILL after the grace period; the same happens if
/// the calling future is dropped mid-run. Whatever the command left behind
/// in its group is killed once it exits.
#[derive(Debug, Clone, Copy)]
pub struct TokioCommandRunner {
    grace: Duration,
}

impl Default for TokioCommandRunner {
    fn default() -> Self {
        Self {
            grace: DEFAULT_TERMINATE_GRACE,
        }
    }
}

impl TokioCommandRunner {
    /// A runner with the default grace period.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the time between SIGTERM and SIGKILL.
    #[must_use]
    pub const fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }
}

#[async_trait]
impl CommandRunner for TokioCommandRunner {
    async fn run(&self, cmd: &CommandSpec, timeout: Duration) -> Result<CommandOutput, SpawnError> {
        let started = Instant::now();
        let mut command = cmd.to_tokio_command();
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        isolate(&mut command);

        debug!(command = %cmd, timeout_secs = timeout.as_secs(), "Running command");
        let mut child = command
            .spawn()
            .map_err(|e| SpawnError::from_io(&cmd.program, &e))?;
        let mut guard = GroupGuard::new(&child, self.grace);

        let stdout_task = tokio::spawn(read_to_string(child.stdout.take()));
        let stderr_task = tokio::spawn(read_to_string(child.stderr.take()));

        let (exit_code, timed_out) = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => (status.code(), false),
            Ok(Err(e)) => {
                return Err(SpawnError::new(&cmd.program, format!("wait failed: {e}")));
            }
            Err(_) => {
                warn!(command = %cmd, timeout_secs = timeout.as_secs(), "Command timed out, stopping");
                send_terminate(&mut child);
                if tokio::time::timeout(self.grace, child.wait()).await.is_err() {
                    warn!(command = %cmd, "Command ignored terminate signal, killing");
                    force_kill(&mut child).await;
                }
                (None, true)
            }
        };
        guard.sweep();

        // Grandchildren may keep the pipes open; bound the drain.
        let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
            futures::join!(stdout_task, stderr_task)
        })
        .await;
        let (stdout, stderr) = match drained {
            Ok((out, err)) => (out.unwrap_or_default(), err.unwrap_or_default()),
            Err(_) => (String::new(), String::new()),
        };

        Ok(CommandOutput {
            stdout,
            stderr,
            exit_code,
            timed_out,
            duration: started.elapsed(),
        })
    }
}

async fn read_to_string<R>(pipe: Option<R>) -> String
where
    R: AsyncRead + Unpin,
{
    let Some(mut pipe) = pipe else {
        return String::new();
    };
    let mut buf = Vec::new();
    if let Err(e) = pipe.read_to_end(&mut buf).await {
        debug!(error = %e, "Pipe read ended with error");
    }
    String::from_utf8_lossy(&buf).into_owned()
}

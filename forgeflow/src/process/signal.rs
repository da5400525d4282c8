//! Process-group signalling shared by the runner and the supervisor.
//!
//! Every child forgeflow spawns leads its own process group, so signals sent
//! here reach whatever the child started as well.

use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::debug;

/// Puts the command's child in a new process group led by itself.
#[cfg(unix)]
pub(crate) fn isolate(command: &mut Command) {
    command.process_group(0);
}

#[cfg(not(unix))]
pub(crate) fn isolate(_command: &mut Command) {}

/// Group id of a spawned child, or `None` once it has been reaped.
#[cfg(unix)]
pub(crate) fn group_of(child: &Child) -> Option<nix::unistd::Pid> {
    let pid = i32::try_from(child.id()?).ok()?;
    Some(nix::unistd::Pid::from_raw(pid))
}

/// Sends SIGTERM to the child's group.
#[cfg(unix)]
pub(crate) fn send_terminate(child: &mut Child) {
    if let Some(pgid) = group_of(child) {
        signal_group(pgid, nix::sys::signal::Signal::SIGTERM);
    }
}

#[cfg(not(unix))]
pub(crate) fn send_terminate(child: &mut Child) {
    // No graceful signal available; the grace wait is followed by a kill.
    let _ = child.start_kill();
}

/// Sends SIGKILL to the child's group.
#[cfg(unix)]
fn kill_group(child: &Child) {
    if let Some(pgid) = group_of(child) {
        signal_group(pgid, nix::sys::signal::Signal::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_group(_child: &Child) {}

/// Kills the group and the child itself.
pub(crate) async fn force_kill(child: &mut Child) {
    kill_group(child);
    if let Err(e) = child.kill().await {
        debug!(error = %e, "Kill after grace period failed");
    }
}

/// Signals a group whose leader may already be gone. A group with no members
/// left (ESRCH) is fine.
#[cfg(unix)]
pub(crate) fn signal_group(pgid: nix::unistd::Pid, signal: nix::sys::signal::Signal) {
    match nix::sys::signal::killpg(pgid, signal) {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
        Err(e) => debug!(pgid = %pgid, signal = ?signal, error = %e, "Group signal failed"),
    }
}

/// Stops a child's group when dropped: SIGTERM at once, SIGKILL after
/// `grace`.
///
/// Covers the paths where the owning future is dropped mid-flight, such as a
/// stage task being aborted. [`sweep`](Self::sweep) it once the command has
/// exited.
#[derive(Debug)]
pub(crate) struct GroupGuard {
    #[cfg(unix)]
    pgid: Option<nix::unistd::Pid>,
    grace: Duration,
}

impl GroupGuard {
    pub(crate) fn new(child: &Child, grace: Duration) -> Self {
        #[cfg(not(unix))]
        let _ = child;
        Self {
            #[cfg(unix)]
            pgid: group_of(child),
            grace,
        }
    }

    /// Kills what is left of the group right away and disarms the guard.
    #[cfg(unix)]
    pub(crate) fn sweep(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            signal_group(pgid, nix::sys::signal::Signal::SIGKILL);
        }
    }

    #[cfg(not(unix))]
    pub(crate) fn sweep(&mut self) {
        let _ = self.grace;
    }
}

impl Drop for GroupGuard {
    #[cfg(unix)]
    fn drop(&mut self) {
        use nix::sys::signal::Signal;

        let Some(pgid) = self.pgid.take() else {
            return;
        };
        signal_group(pgid, Signal::SIGTERM);
        let grace = self.grace;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tokio::time::sleep(grace).await;
                    signal_group(pgid, Signal::SIGKILL);
                });
            }
            Err(_) => signal_group(pgid, Signal::SIGKILL),
        }
    }

    #[cfg(not(unix))]
    fn drop(&mut self) {}
}

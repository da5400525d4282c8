//! Ownership registry for long-lived service processes.
//!
//! Every service the run starts is registered here together with its port
//! lease. Stopping a process (gracefully, then forcibly) removes it from the
//! registry and releases its lease; [`ProcessSupervisor::stop_all`] is the
//! teardown hook the orchestrator calls on every exit path.

use super::signal::{force_kill, isolate, send_terminate};
use super::CommandSpec;
use crate::core::{Language, StageKind};
use crate::errors::SpawnError;
use crate::events::{NoOpEventSink, RunEventSink, PROCESS_STARTED, PROCESS_STOPPED};
use crate::ports::PortLease;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Child;
use tracing::{debug, info, warn};

/// Identifier of a supervised process, unique within a supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProcessId(u64);

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "process-{}", self.0)
    }
}

/// Snapshot of a supervised process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagedProcess {
    /// Registry id.
    pub id: ProcessId,
    /// OS process id, if the platform reported one.
    pub pid: Option<u32>,
    /// Port leased for the process.
    pub port: Option<u16>,
    /// Language target the service belongs to.
    pub language: Language,
    /// Stage that started the process.
    pub owner: Option<StageKind>,
    /// When the process was launched.
    pub started_at: DateTime<Utc>,
    /// File receiving the process's stdout and stderr.
    pub log_path: Option<PathBuf>,
    /// Rendered command line.
    pub command: String,
}

/// Everything needed to launch a service.
#[derive(Debug)]
pub struct StartRequest {
    /// Command to run.
    pub command: CommandSpec,
    /// Language target.
    pub language: Language,
    /// Lease held for the lifetime of the process.
    pub lease: Option<PortLease>,
    /// Stage that owns the process.
    pub owner: Option<StageKind>,
    /// Where to capture output; discarded when `None`.
    pub log_path: Option<PathBuf>,
}

impl StartRequest {
    /// Creates a request with no lease, owner or log file.
    #[must_use]
    pub fn new(command: CommandSpec, language: Language) -> Self {
        Self {
            command,
            language,
            lease: None,
            owner: None,
            log_path: None,
        }
    }

    /// Attaches the port lease.
    #[must_use]
    pub fn with_lease(mut self, lease: PortLease) -> Self {
        self.lease = Some(lease);
        self
    }

    /// Sets the owning stage.
    #[must_use]
    pub fn with_owner(mut self, owner: StageKind) -> Self {
        self.owner = Some(owner);
        self
    }

    /// Sets the output capture file.
    #[must_use]
    pub fn with_log_path(mut self, path: impl AsRef<Path>) -> Self {
        self.log_path = Some(path.as_ref().to_path_buf());
        self
    }
}

/// How a process ended up stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// The process had already exited.
    AlreadyExited,
    /// The process exited within the grace period after the terminate signal.
    Graceful,
    /// The process was killed after the grace period.
    Forced,
}

/// Result of stopping one process.
#[derive(Debug, Clone)]
pub struct StopReport {
    /// The stopped process.
    pub process: ManagedProcess,
    /// How it stopped.
    pub termination: Termination,
    /// Exit code, if it exited normally.
    pub exit_code: Option<i32>,
}

struct Supervised {
    info: ManagedProcess,
    child: Child,
    lease: Option<PortLease>,
}

/// Starts services and guarantees they are stopped.
pub struct ProcessSupervisor {
    registry: Mutex<BTreeMap<ProcessId, Supervised>>,
    next_id: AtomicU64,
    events: Arc<dyn RunEventSink>,
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ProcessSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessSupervisor")
            .field("registered", &self.registry.lock().len())
            .field("started", &self.started_count())
            .finish_non_exhaustive()
    }
}

impl ProcessSupervisor {
    /// Creates an empty supervisor.
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            events: Arc::new(NoOpEventSink),
        }
    }

    /// Sets the sink receiving process events.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn RunEventSink>) -> Self {
        self.events = events;
        self
    }

    /// Launches a process and registers it.
    ///
    /// The child runs in its own process group so that stopping it also
    /// reaches anything it spawned.
    pub fn start(&self, request: StartRequest) -> Result<ManagedProcess, SpawnError> {
        let program = request.command.program.clone();
        let mut command = request.command.to_tokio_command();
        command.stdin(Stdio::null()).kill_on_drop(true);

        if let Some(path) = &request.log_path {
            let (stdout, stderr) = open_log(path).map_err(|e| SpawnError::from_io(&program, &e))?;
            command.stdout(stdout).stderr(stderr);
        } else {
            command.stdout(Stdio::null()).stderr(Stdio::null());
        }

        isolate(&mut command);

        let child = command
            .spawn()
            .map_err(|e| SpawnError::from_io(&program, &e))?;

        let id = ProcessId(self.next_id.fetch_add(1, Ordering::SeqCst));
        if let Some(lease) = &request.lease {
            lease.assign_owner(id.to_string());
        }

        let info = ManagedProcess {
            id,
            pid: child.id(),
            port: request.lease.as_ref().map(PortLease::port),
            language: request.language,
            owner: request.owner,
            started_at: Utc::now(),
            log_path: request.log_path,
            command: request.command.to_string(),
        };

        info!(
            process = %id,
            pid = ?info.pid,
            port = ?info.port,
            language = %info.language,
            command = %info.command,
            "Service process started"
        );
        self.events.try_emit(
            PROCESS_STARTED,
            Some(serde_json::json!({
                "process": id.to_string(),
                "pid": info.pid,
                "port": info.port,
                "language": info.language,
            })),
        );

        self.registry.lock().insert(
            id,
            Supervised {
                info: info.clone(),
                child,
                lease: request.lease,
            },
        );
        Ok(info)
    }

    /// Stops a process: terminate signal, up to `grace` to exit, then kill.
    ///
    /// Returns `None` for an unknown (or already stopped) id.
    pub async fn stop(&self, id: ProcessId, grace: Duration) -> Option<StopReport> {
        let entry = self.registry.lock().remove(&id)?;
        Some(self.terminate(entry, grace).await)
    }

    /// Stops every registered process. Idempotent.
    pub async fn stop_all(&self, grace: Duration) -> Vec<StopReport> {
        let entries: Vec<Supervised> = {
            let mut registry = self.registry.lock();
            std::mem::take(&mut *registry).into_values().collect()
        };
        if entries.is_empty() {
            return Vec::new();
        }
        debug!(count = entries.len(), "Stopping all supervised processes");
        futures::future::join_all(entries.into_iter().map(|e| self.terminate(e, grace))).await
    }

    /// Stops every process started by `stage`.
    pub async fn stop_owned_by(&self, stage: StageKind, grace: Duration) -> Vec<StopReport> {
        let entries: Vec<Supervised> = {
            let mut registry = self.registry.lock();
            let ids: Vec<ProcessId> = registry
                .iter()
                .filter(|(_, e)| e.info.owner == Some(stage))
                .map(|(id, _)| *id)
                .collect();
            ids.iter().filter_map(|id| registry.remove(id)).collect()
        };
        futures::future::join_all(entries.into_iter().map(|e| self.terminate(e, grace))).await
    }

    /// Returns true if the process is registered and still running.
    #[must_use]
    pub fn is_alive(&self, id: ProcessId) -> bool {
        self.registry
            .lock()
            .get_mut(&id)
            .is_some_and(|e| matches!(e.child.try_wait(), Ok(None)))
    }

    /// Snapshot of a registered process.
    #[must_use]
    pub fn process(&self, id: ProcessId) -> Option<ManagedProcess> {
        self.registry.lock().get(&id).map(|e| e.info.clone())
    }

    /// Number of registered processes that are still running.
    #[must_use]
    pub fn live_count(&self) -> usize {
        let mut registry = self.registry.lock();
        let mut live = 0;
        for entry in registry.values_mut() {
            if matches!(entry.child.try_wait(), Ok(None)) {
                live += 1;
            }
        }
        live
    }

    /// Total number of processes ever started by this supervisor.
    #[must_use]
    pub fn started_count(&self) -> u64 {
        self.next_id.load(Ordering::SeqCst) - 1
    }

    async fn terminate(&self, mut entry: Supervised, grace: Duration) -> StopReport {
        let id = entry.info.id;
        let pgid = group_id(entry.info.pid);
        let (termination, exit_code) = match entry.child.try_wait() {
            Ok(Some(status)) => {
                sweep_group(pgid);
                (Termination::AlreadyExited, status.code())
            }
            _ => {
                send_terminate(&mut entry.child);
                match tokio::time::timeout(grace, entry.child.wait()).await {
                    Ok(Ok(status)) => {
                        // Group members that ignored SIGTERM outlive the leader.
                        sweep_group(pgid);
                        (Termination::Graceful, status.code())
                    }
                    Ok(Err(e)) => {
                        warn!(process = %id, error = %e, "Wait failed, killing");
                        force_kill(&mut entry.child).await;
                        (Termination::Forced, None)
                    }
                    Err(_) => {
                        warn!(
                            process = %id,
                            grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX),
                            "Process ignored terminate signal, killing"
                        );
                        force_kill(&mut entry.child).await;
                        (Termination::Forced, None)
                    }
                }
            }
        };

        if let Some(lease) = entry.lease.take() {
            lease.release();
        }

        info!(process = %id, termination = ?termination, exit_code = ?exit_code, "Service process stopped");
        self.events.try_emit(
            PROCESS_STOPPED,
            Some(serde_json::json!({
                "process": id.to_string(),
                "termination": termination,
                "exit_code": exit_code,
            })),
        );

        StopReport {
            process: entry.info,
            termination,
            exit_code,
        }
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        // Backstop for callers that skipped `stop_all`.
        for entry in self.registry.get_mut().values_mut() {
            sweep_group(group_id(entry.info.pid));
            let _ = entry.child.start_kill();
        }
    }
}

fn open_log(path: &Path) -> std::io::Result<(Stdio, Stdio)> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(path)?;
    let err = file.try_clone()?;
    Ok((Stdio::from(file), Stdio::from(err)))
}

/// The group id is the leader's pid, recorded at spawn since `Child::id`
/// is gone once the leader has been reaped.
#[cfg(unix)]
fn group_id(pid: Option<u32>) -> Option<nix::unistd::Pid> {
    let pid = i32::try_from(pid?).ok()?;
    Some(nix::unistd::Pid::from_raw(pid))
}

#[cfg(not(unix))]
const fn group_id(_pid: Option<u32>) -> Option<()> {
    None
}

#[cfg(unix)]
fn sweep_group(pgid: Option<nix::unistd::Pid>) {
    if let Some(pgid) = pgid {
        super::signal::signal_group(pgid, nix::sys::signal::Signal::SIGKILL);
    }
}

#[cfg(not(unix))]
const fn sweep_group(_pgid: Option<()>) {}

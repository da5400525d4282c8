//! Scripted process, probe and stage doubles.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use crate::core::{StageKind, StageOutput};
use crate::errors::{ForgeflowError, GenerationError, SpawnError};
use crate::process::{CommandOutput, CommandRunner, CommandSpec};
use crate::readiness::{ProbeAttempt, Prober};
use crate::stages::{RunContext, Stage};

/// A command runner that replays queued results and records every command.
///
/// Once the queue is empty every command succeeds with no output.
#[derive(Debug, Default)]
pub struct ScriptedCommandRunner {
    responses: Mutex<VecDeque<Result<CommandOutput, SpawnError>>>,
    commands: Mutex<Vec<CommandSpec>>,
}

impl ScriptedCommandRunner {
    /// Creates a runner with an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an output.
    #[must_use]
    pub fn respond(self, output: CommandOutput) -> Self {
        self.responses.lock().push_back(Ok(output));
        self
    }

    /// Queues a launch failure.
    #[must_use]
    pub fn fail_spawn(self, err: SpawnError) -> Self {
        self.responses.lock().push_back(Err(err));
        self
    }

    /// Commands run so far, in order.
    #[must_use]
    pub fn commands(&self) -> Vec<CommandSpec> {
        self.commands.lock().clone()
    }
}

#[async_trait]
impl CommandRunner for ScriptedCommandRunner {
    async fn run(&self, cmd: &CommandSpec, _timeout: Duration) -> Result<CommandOutput, SpawnError> {
        self.commands.lock().push(cmd.clone());
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(CommandOutput::new("", "", Some(0))))
    }
}

/// A prober that replays a fixed sequence of attempts.
#[derive(Debug)]
pub struct ScriptedProber {
    script: Mutex<VecDeque<ProbeAttempt>>,
    fallback: ProbeAttempt,
    calls: AtomicU32,
}

impl ScriptedProber {
    /// Replays `attempts`, then reports connection refused.
    #[must_use]
    pub fn new(attempts: impl IntoIterator<Item = ProbeAttempt>) -> Self {
        Self {
            script: Mutex::new(attempts.into_iter().collect()),
            fallback: ProbeAttempt::Refused,
            calls: AtomicU32::new(0),
        }
    }

    /// Returns `attempt` forever.
    #[must_use]
    pub fn always(attempt: ProbeAttempt) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: attempt,
            calls: AtomicU32::new(0),
        }
    }

    /// Number of probes made.
    #[must_use]
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn probe(&self, _url: &str, _timeout: Duration) -> ProbeAttempt {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

/// What a [`StubStage`] does when executed.
#[derive(Debug, Clone)]
pub enum StubBehavior {
    /// Returns the output.
    Succeed(StageOutput),
    /// Fails with a generation error carrying the message.
    Fail(String),
    /// Panics.
    Panic,
    /// Sleeps, then succeeds.
    Sleep(Duration),
}

/// A stage with scripted behavior that counts its executions.
#[derive(Debug)]
pub struct StubStage {
    kind: StageKind,
    behavior: StubBehavior,
    calls: AtomicU32,
}

impl StubStage {
    /// Creates a stub for `kind`.
    #[must_use]
    pub fn new(kind: StageKind, behavior: StubBehavior) -> Self {
        Self {
            kind,
            behavior,
            calls: AtomicU32::new(0),
        }
    }

    /// A stub that succeeds with an empty output.
    #[must_use]
    pub fn ok(kind: StageKind) -> Self {
        Self::new(kind, StubBehavior::Succeed(StageOutput::ok()))
    }

    /// Number of executions.
    #[must_use]
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Stage for StubStage {
    fn kind(&self) -> StageKind {
        self.kind
    }

    async fn execute(&self, _ctx: &RunContext) -> Result<StageOutput, ForgeflowError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            StubBehavior::Succeed(output) => Ok(output.clone()),
            StubBehavior::Fail(message) => Err(GenerationError::new(message.clone()).into()),
            StubBehavior::Panic => panic!("stub stage panicked"),
            StubBehavior::Sleep(duration) => {
                tokio::time::sleep(*duration).await;
                Ok(StageOutput::ok())
            }
        }
    }
}

//! Shared state for the stages of one run.

use crate::cancellation::CancellationToken;
use crate::collaborators::{CodeGenerator, DatasetSource, VcsClient};
use crate::config::WorkflowConfig;
use crate::core::{Language, StageKind};
use crate::events::RunEventSink;
use crate::harness::{TestHarness, TestOutcome};
use crate::ports::PortAllocator;
use crate::process::{ProcessId, ProcessSupervisor};
use crate::readiness::{Prober, ReadinessProbe};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// The external services a run talks to.
#[derive(Clone)]
pub struct Collaborators {
    /// Code generation.
    pub generator: Arc<dyn CodeGenerator>,
    /// Version control.
    pub vcs: Arc<dyn VcsClient>,
    /// Dataset download.
    pub dataset: Arc<dyn DatasetSource>,
    /// Language test harness.
    pub harness: Arc<dyn TestHarness>,
    /// Readiness prober.
    pub prober: Arc<dyn Prober>,
}

/// Where the running service can be reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEndpoint {
    /// Supervisor id of the service process.
    pub process: ProcessId,
    /// Leased port.
    pub port: u16,
    /// Base URL.
    pub url: String,
    /// URL polled for readiness.
    pub health_url: String,
}

#[derive(Debug, Default)]
struct RunState {
    plan: Vec<StageKind>,
    service: Option<ServiceEndpoint>,
    ready: bool,
    test_outcome: Option<TestOutcome>,
}

/// Everything a stage can reach during a run.
///
/// Created by the orchestrator, shared behind an `Arc`; stages communicate
/// through the small typed state kept here (service endpoint, readiness,
/// test outcome) rather than through each other's outputs.
pub struct RunContext {
    run_id: Uuid,
    config: Arc<WorkflowConfig>,
    /// Port leases.
    pub allocator: PortAllocator,
    /// Service processes.
    pub supervisor: Arc<ProcessSupervisor>,
    /// Readiness polling.
    pub probe: ReadinessProbe,
    /// External services.
    pub collaborators: Collaborators,
    events: Arc<dyn RunEventSink>,
    cancellation: Arc<CancellationToken>,
    state: RwLock<RunState>,
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("run_id", &self.run_id)
            .field("language", &self.config.language)
            .field("working_dir", &self.config.working_dir)
            .field("allocator", &self.allocator)
            .field("supervisor", &self.supervisor)
            .finish_non_exhaustive()
    }
}

impl RunContext {
    /// Creates the context for a new run.
    #[must_use]
    pub fn new(
        config: Arc<WorkflowConfig>,
        collaborators: Collaborators,
        allocator: PortAllocator,
        events: Arc<dyn RunEventSink>,
        cancellation: Arc<CancellationToken>,
    ) -> Self {
        let supervisor = ProcessSupervisor::new().with_events(events.clone());
        let probe = ReadinessProbe::new(collaborators.prober.clone()).with_events(events.clone());
        Self {
            run_id: Uuid::now_v7(),
            config,
            allocator,
            supervisor: Arc::new(supervisor),
            probe,
            collaborators,
            events,
            cancellation,
            state: RwLock::new(RunState::default()),
        }
    }

    /// Unique id of this run.
    #[must_use]
    pub const fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Run configuration.
    #[must_use]
    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Target language.
    #[must_use]
    pub fn language(&self) -> Language {
        self.config.language
    }

    /// Artifact root.
    #[must_use]
    pub fn workdir(&self) -> &Path {
        &self.config.working_dir
    }

    /// Event sink.
    #[must_use]
    pub fn events(&self) -> &Arc<dyn RunEventSink> {
        &self.events
    }

    /// Cancellation token.
    #[must_use]
    pub fn cancellation(&self) -> &Arc<CancellationToken> {
        &self.cancellation
    }

    /// Runner output log for `stage`.
    #[must_use]
    pub fn stage_log(&self, stage: StageKind) -> PathBuf {
        self.config
            .state_dir()
            .join("logs")
            .join(format!("{stage}.log"))
    }

    /// Output capture file for this run's service.
    #[must_use]
    pub fn service_log(&self) -> PathBuf {
        self.config
            .state_dir()
            .join("logs")
            .join(format!("{}-{}.log", self.config.language, self.run_id))
    }

    pub(crate) fn set_plan(&self, plan: Vec<StageKind>) {
        self.state.write().plan = plan;
    }

    /// Returns true if the run's plan includes `stage`.
    #[must_use]
    pub fn plan_contains(&self, stage: StageKind) -> bool {
        self.state.read().plan.contains(&stage)
    }

    /// Records the started service.
    pub fn set_service(&self, endpoint: ServiceEndpoint) {
        let mut state = self.state.write();
        state.service = Some(endpoint);
        state.ready = false;
    }

    /// The started service, if any.
    #[must_use]
    pub fn service(&self) -> Option<ServiceEndpoint> {
        self.state.read().service.clone()
    }

    /// Marks the service as answering requests.
    pub fn mark_ready(&self) {
        self.state.write().ready = true;
    }

    /// Returns true once the readiness probe succeeded.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state.read().ready
    }

    /// Records the test outcome.
    pub fn set_test_outcome(&self, outcome: TestOutcome) {
        self.state.write().test_outcome = Some(outcome);
    }

    /// The last test outcome.
    #[must_use]
    pub fn test_outcome(&self) -> Option<TestOutcome> {
        self.state.read().test_outcome.clone()
    }
}

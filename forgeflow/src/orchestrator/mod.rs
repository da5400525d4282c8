//! Workflow orchestration.
//!
//! The orchestrator owns the stage plan for one language target, drives
//! each stage through the [`StageRunner`], stops at the first failed
//! required stage, and always tears down every service the run started.

mod plan;
mod report;

pub use plan::{default_plan, default_stage};
pub use report::WorkflowRun;

use crate::cancellation::CancellationToken;
use crate::collaborators::{CodeGenerator, DatasetSource, GitCli, HttpDatasetSource, VcsClient};
use crate::config::WorkflowConfig;
use crate::core::{StageKind, StagePolicy, StageResult};
use crate::errors::ForgeflowError;
use crate::events::{NoOpEventSink, RunEventSink};
use crate::harness::{harness_for, TestHarness};
use crate::ports::PortAllocator;
use crate::process::{CommandRunner, TokioCommandRunner};
use crate::readiness::{HttpProber, Prober};
use crate::stages::{Collaborators, RunContext, Stage, StageRunner, StageSpec};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{info, info_span, warn, Instrument};

/// Runs the stage plan for one configuration.
pub struct WorkflowOrchestrator {
    config: Arc<WorkflowConfig>,
    plan: Vec<StageSpec>,
    stages: BTreeMap<StageKind, Arc<dyn Stage>>,
    collaborators: Collaborators,
    allocator: PortAllocator,
    events: Arc<dyn RunEventSink>,
    cancellation: Arc<CancellationToken>,
}

impl fmt::Debug for WorkflowOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowOrchestrator")
            .field("language", &self.config.language)
            .field("plan", &self.plan)
            .finish_non_exhaustive()
    }
}

impl WorkflowOrchestrator {
    /// Starts building an orchestrator for `config`.
    #[must_use]
    pub fn builder(config: WorkflowConfig) -> WorkflowOrchestratorBuilder {
        WorkflowOrchestratorBuilder::new(config)
    }

    /// The stage plan.
    #[must_use]
    pub fn plan(&self) -> &[StageSpec] {
        &self.plan
    }

    /// The run configuration.
    #[must_use]
    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Token that cancels the current run when triggered.
    #[must_use]
    pub fn cancellation(&self) -> Arc<CancellationToken> {
        Arc::clone(&self.cancellation)
    }

    /// Executes the plan and returns the finalized report.
    ///
    /// Never fails: stage errors are recorded in the report, and teardown
    /// runs on every path. A report that cannot be persisted is logged.
    pub async fn run(&self) -> WorkflowRun {
        let ctx = Arc::new(RunContext::new(
            Arc::clone(&self.config),
            self.collaborators.clone(),
            self.allocator.clone(),
            Arc::clone(&self.events),
            Arc::clone(&self.cancellation),
        ));
        let span = info_span!("run", run_id = %ctx.run_id(), language = %self.config.language);
        self.run_in(ctx).instrument(span).await
    }

    async fn run_in(&self, ctx: Arc<RunContext>) -> WorkflowRun {
        ctx.set_plan(self.plan.iter().map(|s| s.stage).collect());
        let mut report = WorkflowRun::new(ctx.run_id(), &self.config);
        info!(
            working_dir = %self.config.working_dir.display(),
            stages = self.plan.len(),
            "Run started"
        );

        let mut halted: Option<String> = None;
        for spec in &self.plan {
            if halted.is_none() && ctx.cancellation().is_cancelled() {
                halted = Some(format!(
                    "run cancelled: {}",
                    ctx.cancellation().reason().unwrap_or_default()
                ));
            }
            if let Some(reason) = &halted {
                report.record(StageResult::halted(spec.stage, spec.policy, reason.clone()));
                continue;
            }
            let Some(stage) = self.stages.get(&spec.stage) else {
                report.record(StageResult::halted(
                    spec.stage,
                    spec.policy,
                    "no implementation registered",
                ));
                continue;
            };

            let result = StageRunner::run(*spec, Arc::clone(stage), &ctx).await;
            if spec.policy == StagePolicy::Required && result.status.is_failure() {
                halted = Some(format!("halted after {} stage '{}'", result.status, spec.stage));
            }
            report.record(result);
        }

        let stopped = ctx.supervisor.stop_all(self.config.grace_timeout()).await;
        if !stopped.is_empty() {
            info!(count = stopped.len(), "Stopped remaining services");
        }

        report.finalize();
        match report.persist(&self.config.state_dir()) {
            Ok(path) => info!(report = %path.display(), "Run report written"),
            Err(e) => warn!(error = %e, "Cannot write run report"),
        }
        info!(outcome = %report.outcome(), exit_code = report.exit_code(), "Run finished");
        report
    }
}

/// Builder for [`WorkflowOrchestrator`].
///
/// A code generator is required; every other collaborator defaults to its
/// live implementation.
pub struct WorkflowOrchestratorBuilder {
    config: WorkflowConfig,
    generator: Option<Arc<dyn CodeGenerator>>,
    vcs: Option<Arc<dyn VcsClient>>,
    dataset: Option<Arc<dyn DatasetSource>>,
    harness: Option<Arc<dyn TestHarness>>,
    prober: Option<Arc<dyn Prober>>,
    runner: Option<Arc<dyn CommandRunner>>,
    allocator: Option<PortAllocator>,
    events: Arc<dyn RunEventSink>,
    cancellation: Arc<CancellationToken>,
    plan: Option<Vec<StageSpec>>,
    overrides: BTreeMap<StageKind, Arc<dyn Stage>>,
}

impl fmt::Debug for WorkflowOrchestratorBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowOrchestratorBuilder")
            .field("language", &self.config.language)
            .field("overrides", &self.overrides.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl WorkflowOrchestratorBuilder {
    fn new(config: WorkflowConfig) -> Self {
        Self {
            config,
            generator: None,
            vcs: None,
            dataset: None,
            harness: None,
            prober: None,
            runner: None,
            allocator: None,
            events: Arc::new(NoOpEventSink),
            cancellation: Arc::new(CancellationToken::new()),
            plan: None,
            overrides: BTreeMap::new(),
        }
    }

    /// Sets the code generator.
    #[must_use]
    pub fn with_generator(mut self, generator: Arc<dyn CodeGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Sets the VCS client.
    #[must_use]
    pub fn with_vcs(mut self, vcs: Arc<dyn VcsClient>) -> Self {
        self.vcs = Some(vcs);
        self
    }

    /// Sets the dataset source.
    #[must_use]
    pub fn with_dataset(mut self, dataset: Arc<dyn DatasetSource>) -> Self {
        self.dataset = Some(dataset);
        self
    }

    /// Sets the test harness.
    #[must_use]
    pub fn with_harness(mut self, harness: Arc<dyn TestHarness>) -> Self {
        self.harness = Some(harness);
        self
    }

    /// Sets the readiness prober.
    #[must_use]
    pub fn with_prober(mut self, prober: Arc<dyn Prober>) -> Self {
        self.prober = Some(prober);
        self
    }

    /// Sets the command runner used by the default harness and VCS client.
    #[must_use]
    pub fn with_command_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    /// Shares a port allocator with other runs.
    #[must_use]
    pub fn with_allocator(mut self, allocator: PortAllocator) -> Self {
        self.allocator = Some(allocator);
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn RunEventSink>) -> Self {
        self.events = events;
        self
    }

    /// Uses `token` for cancellation.
    #[must_use]
    pub fn with_cancellation(mut self, token: Arc<CancellationToken>) -> Self {
        self.cancellation = token;
        self
    }

    /// Replaces the default plan.
    #[must_use]
    pub fn with_plan(mut self, plan: Vec<StageSpec>) -> Self {
        self.plan = Some(plan);
        self
    }

    /// Replaces the built-in implementation of `stage.kind()`.
    #[must_use]
    pub fn with_stage(mut self, stage: Arc<dyn Stage>) -> Self {
        self.overrides.insert(stage.kind(), stage);
        self
    }

    /// Validates the configuration and assembles the orchestrator.
    ///
    /// # Errors
    ///
    /// [`ForgeflowError::Config`] for an invalid configuration or a missing
    /// code generator.
    pub fn build(mut self) -> Result<WorkflowOrchestrator, ForgeflowError> {
        self.config.validate()?;
        let generator = self
            .generator
            .take()
            .ok_or_else(|| ForgeflowError::Config("a code generator is required".to_string()))?;

        let language = self.config.language;
        let grace = self.config.grace_timeout();
        let runner: Arc<dyn CommandRunner> = self
            .runner
            .take()
            .unwrap_or_else(|| Arc::new(TokioCommandRunner::new().with_grace(grace)));
        let vcs = self.vcs.take().unwrap_or_else(|| {
            Arc::new(GitCli::new(Arc::clone(&runner)).with_token(self.config.github_token.clone()))
        });
        let collaborators = Collaborators {
            generator,
            vcs,
            dataset: self
                .dataset
                .take()
                .unwrap_or_else(|| Arc::new(HttpDatasetSource::new())),
            harness: self
                .harness
                .take()
                .unwrap_or_else(|| harness_for(language, Arc::clone(&runner))),
            prober: self.prober.take().unwrap_or_else(|| Arc::new(HttpProber::new())),
        };

        let plan = self
            .plan
            .take()
            .unwrap_or_else(|| default_plan(language, &self.config.timeouts));
        let stages = plan
            .iter()
            .map(|spec| {
                let stage = self
                    .overrides
                    .remove(&spec.stage)
                    .unwrap_or_else(|| default_stage(spec.stage));
                (spec.stage, stage)
            })
            .collect();

        Ok(WorkflowOrchestrator {
            config: Arc::new(self.config),
            plan,
            stages,
            collaborators,
            allocator: self.allocator.unwrap_or_default(),
            events: self.events,
            cancellation: self.cancellation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Language, RunOutcome, StageStatus};
    use crate::testing::{AlwaysFreeProbe, StaticGenerator, StubStage};
    use std::time::Duration;

    #[test]
    fn test_build_requires_generator() {
        let err = WorkflowOrchestrator::builder(WorkflowConfig::new(Language::Python, "/tmp/w"))
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), "config_error");
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let config = WorkflowConfig::new(Language::Python, "/tmp/w").with_fork_repo("no-slash");
        let err = WorkflowOrchestrator::builder(config)
            .with_generator(Arc::new(StaticGenerator::new()))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("owner/repo"));
    }

    #[tokio::test]
    async fn test_cancelled_run_skips_remaining_stages() {
        let dir = tempfile::tempdir().unwrap();
        let token = Arc::new(CancellationToken::new());
        token.cancel("interrupted");
        let plan = vec![
            StageSpec::required(StageKind::Fetch, Duration::from_secs(5)),
            StageSpec::required(StageKind::Generate, Duration::from_secs(5)),
        ];
        let fetch = Arc::new(StubStage::ok(StageKind::Fetch));
        let orchestrator =
            WorkflowOrchestrator::builder(WorkflowConfig::new(Language::Python, dir.path()))
                .with_generator(Arc::new(StaticGenerator::new()))
                .with_allocator(PortAllocator::with_probe(Arc::new(AlwaysFreeProbe)))
                .with_cancellation(token)
                .with_plan(plan)
                .with_stage(fetch.clone())
                .with_stage(Arc::new(StubStage::ok(StageKind::Generate)))
                .build()
                .unwrap();

        let report = orchestrator.run().await;

        assert_eq!(fetch.calls(), 0);
        assert!(report.stages.iter().all(|s| s.status == StageStatus::Skipped && s.halted));
        assert!(report.stages[0].cause().unwrap().contains("interrupted"));
        assert_eq!(report.outcome(), RunOutcome::Failed);
        assert_eq!(report.exit_code(), 1);
    }
}

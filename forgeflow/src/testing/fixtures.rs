//! Run context fixtures.

use std::path::Path;
use std::sync::Arc;

use super::{FakeHarness, RecordingVcs, ScriptedProber, StaticDataset, StaticGenerator};
use crate::cancellation::CancellationToken;
use crate::config::WorkflowConfig;
use crate::core::Language;
use crate::events::{NoOpEventSink, RunEventSink};
use crate::ports::{PortAllocator, PortProbe};
use crate::readiness::ProbeAttempt;
use crate::stages::{Collaborators, RunContext};

/// A port probe reporting every port free, so tests do not depend on what
/// the host is listening on.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysFreeProbe;

impl PortProbe for AlwaysFreeProbe {
    fn is_free(&self, _port: u16) -> bool {
        true
    }
}

/// Collaborators that all succeed: generation, VCS, dataset, a harness
/// passing one case, and a service that answers its first probe.
#[must_use]
pub fn stub_collaborators(language: Language) -> Collaborators {
    Collaborators {
        generator: Arc::new(StaticGenerator::new()),
        vcs: Arc::new(RecordingVcs::new()),
        dataset: Arc::new(StaticDataset::new()),
        harness: Arc::new(FakeHarness::passing(language, 1)),
        prober: Arc::new(ScriptedProber::always(ProbeAttempt::Responded { status: 200 })),
    }
}

/// A run context over `config` and `collaborators`, discarding events.
#[must_use]
pub fn context(config: WorkflowConfig, collaborators: Collaborators) -> Arc<RunContext> {
    Arc::new(RunContext::new(
        Arc::new(config),
        collaborators,
        PortAllocator::with_probe(Arc::new(AlwaysFreeProbe)),
        Arc::new(NoOpEventSink),
        Arc::new(CancellationToken::new()),
    ))
}

/// A Python run context rooted at `root`, sending events to `events`.
#[must_use]
pub fn context_with_events(root: &Path, events: Arc<dyn RunEventSink>) -> Arc<RunContext> {
    Arc::new(RunContext::new(
        Arc::new(WorkflowConfig::new(Language::Python, root)),
        stub_collaborators(Language::Python),
        PortAllocator::with_probe(Arc::new(AlwaysFreeProbe)),
        events,
        Arc::new(CancellationToken::new()),
    ))
}

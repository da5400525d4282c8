//! In-memory collaborators.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use crate::collaborators::{
    CodeGenerator, DatasetDownload, DatasetSource, GeneratedText, GenerationRequest, RepoRef,
    VcsClient,
};
use crate::core::Language;
use crate::errors::{
    DatasetError, GenerationError, HarnessInvocationError, VcsError, VcsOperation,
};
use crate::harness::{HarnessContext, TestHarness, TestOutcome};

/// A generator answering every prompt with a short non-empty source.
#[derive(Debug, Default)]
pub struct StaticGenerator {
    failure: Option<String>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl StaticGenerator {
    /// Creates a generator that always succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a generator that always fails with `message`.
    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Requests received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl CodeGenerator for StaticGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<GeneratedText, GenerationError> {
        let text = format!("generated {} source\n", request.language);
        let model = request.model.clone().unwrap_or_else(|| "static".to_string());
        self.requests.lock().push(request);
        match &self.failure {
            Some(message) => Err(GenerationError::new(message.clone())),
            None => Ok(GeneratedText { text, model }),
        }
    }
}

/// A VCS client recording each operation by name.
#[derive(Debug, Default)]
pub struct RecordingVcs {
    fail_push: bool,
    operations: Mutex<Vec<String>>,
}

impl RecordingVcs {
    /// Creates a client on which every operation succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every push fail.
    #[must_use]
    pub fn failing_push(mut self) -> Self {
        self.fail_push = true;
        self
    }

    /// Operations performed, in order.
    #[must_use]
    pub fn operations(&self) -> Vec<String> {
        self.operations.lock().clone()
    }

    fn record(&self, operation: VcsOperation) {
        self.operations.lock().push(operation.to_string());
    }
}

#[async_trait]
impl VcsClient for RecordingVcs {
    async fn prepare(
        &self,
        _path: PathBuf,
        _branch: String,
        _remote_url: Option<String>,
    ) -> Result<(), VcsError> {
        self.record(VcsOperation::Init);
        Ok(())
    }

    async fn fork(&self, source: String) -> Result<RepoRef, VcsError> {
        self.record(VcsOperation::Fork);
        let (_, name) = RepoRef::parse_source(&source)?;
        Ok(RepoRef {
            owner: "forgeflow".to_string(),
            clone_url: format!("https://github.com/forgeflow/{name}.git"),
            name,
        })
    }

    async fn clone_repo(&self, _repo: RepoRef, _dest: PathBuf) -> Result<bool, VcsError> {
        self.record(VcsOperation::Clone);
        Ok(true)
    }

    async fn commit(
        &self,
        _path: PathBuf,
        _files: Vec<PathBuf>,
        _message: String,
    ) -> Result<Option<String>, VcsError> {
        self.record(VcsOperation::Commit);
        Ok(Some("0000000".to_string()))
    }

    async fn push(&self, _path: PathBuf, _remote: String, _branch: String) -> Result<(), VcsError> {
        self.record(VcsOperation::Push);
        if self.fail_push {
            return Err(VcsError::new(VcsOperation::Push, "remote rejected the push"));
        }
        Ok(())
    }
}

const IRIS_SAMPLE: &str = "5.1,3.5,1.4,0.2,Iris-setosa\n7.0,3.2,4.7,1.4,Iris-versicolor\n";

/// A dataset source writing a two-row sample, or failing.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticDataset {
    unavailable: bool,
}

impl StaticDataset {
    /// Creates a source that always succeeds.
    #[must_use]
    pub const fn new() -> Self {
        Self { unavailable: false }
    }

    /// Creates a source whose mirrors are all down.
    #[must_use]
    pub const fn unavailable() -> Self {
        Self { unavailable: true }
    }
}

#[async_trait]
impl DatasetSource for StaticDataset {
    async fn download(&self, urls: &[String], dest: &Path) -> Result<DatasetDownload, DatasetError> {
        if self.unavailable {
            return Err(DatasetError {
                message: "all dataset URLs failed".to_string(),
            });
        }
        std::fs::write(dest, IRIS_SAMPLE).map_err(|e| DatasetError {
            message: e.to_string(),
        })?;
        Ok(DatasetDownload {
            url: urls.first().cloned().unwrap_or_default(),
            bytes: IRIS_SAMPLE.len() as u64,
            attempts: 1,
        })
    }
}

/// A harness returning a fixed outcome.
#[derive(Debug)]
pub struct FakeHarness {
    language: Language,
    outcome: TestOutcome,
    prepare_fails: bool,
    prepare_calls: AtomicU32,
    run_calls: AtomicU32,
    last_service_url: Mutex<Option<String>>,
}

impl FakeHarness {
    /// A harness reporting `passed` passing cases.
    #[must_use]
    pub fn passing(language: Language, passed: u32) -> Self {
        Self::with_outcome(
            language,
            TestOutcome {
                passed,
                exit_code: Some(0),
                ..TestOutcome::default()
            },
        )
    }

    /// A harness reporting `outcome`.
    #[must_use]
    pub fn with_outcome(language: Language, outcome: TestOutcome) -> Self {
        Self {
            language,
            outcome,
            prepare_fails: false,
            prepare_calls: AtomicU32::new(0),
            run_calls: AtomicU32::new(0),
            last_service_url: Mutex::new(None),
        }
    }

    /// Makes dependency installation fail.
    #[must_use]
    pub fn failing_prepare(mut self) -> Self {
        self.prepare_fails = true;
        self
    }

    /// Number of `prepare` calls.
    #[must_use]
    pub fn prepare_calls(&self) -> u32 {
        self.prepare_calls.load(Ordering::SeqCst)
    }

    /// Number of `run` calls.
    #[must_use]
    pub fn run_calls(&self) -> u32 {
        self.run_calls.load(Ordering::SeqCst)
    }

    /// Service URL passed to the last `run`.
    #[must_use]
    pub fn last_service_url(&self) -> Option<String> {
        self.last_service_url.lock().clone()
    }
}

#[async_trait]
impl TestHarness for FakeHarness {
    fn language(&self) -> Language {
        self.language
    }

    fn runner_name(&self) -> &'static str {
        "fake"
    }

    async fn prepare(&self, _ctx: &HarnessContext) -> Result<(), HarnessInvocationError> {
        self.prepare_calls.fetch_add(1, Ordering::SeqCst);
        if self.prepare_fails {
            return Err(HarnessInvocationError::new("fake", "dependency install failed"));
        }
        Ok(())
    }

    async fn run(&self, ctx: &HarnessContext) -> Result<TestOutcome, HarnessInvocationError> {
        self.run_calls.fetch_add(1, Ordering::SeqCst);
        self.last_service_url.lock().clone_from(&ctx.service_url);
        Ok(self.outcome.clone())
    }
}

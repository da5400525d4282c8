//! Per-language test harness adapters.
//!
//! A harness discovers the generated test file, invokes the ecosystem's
//! runner and turns its output into a [`TestOutcome`]. Failing tests are a
//! normal outcome; only a runner that cannot be invoked at all is an error.

mod browser;
mod julia;
pub mod parse;
mod python;

pub use browser::BrowserHarness;
pub use julia::JuliaHarness;
pub use python::PythonHarness;

use crate::core::Language;
use crate::errors::{HarnessInvocationError, TestFailureError};
use crate::process::CommandRunner;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Result of one test runner invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestOutcome {
    /// Passed cases.
    pub passed: u32,
    /// Failed cases.
    pub failed: u32,
    /// Errored cases.
    pub errored: u32,
    /// Skipped cases.
    pub skipped: u32,
    /// Tests could not be collected; a defect in the generated code.
    pub collection_error: bool,
    /// Runner exit code.
    pub exit_code: Option<i32>,
    /// The runner exceeded its timeout and was killed.
    pub timed_out: bool,
    /// Raw runner log.
    pub log_path: Option<PathBuf>,
    /// Non-fatal observations (asset checks and similar).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl TestOutcome {
    /// Outcome for tests that could not be collected: zero cases.
    #[must_use]
    pub fn collection_failure(exit_code: Option<i32>, log_path: Option<PathBuf>) -> Self {
        Self {
            collection_error: true,
            exit_code,
            log_path,
            ..Self::default()
        }
    }

    /// Cases the runner reported.
    #[must_use]
    pub const fn collected(&self) -> u32 {
        self.passed + self.failed + self.errored + self.skipped
    }

    /// Every collected case passed and the runner exited cleanly.
    #[must_use]
    pub fn is_success(&self) -> bool {
        !self.collection_error
            && !self.timed_out
            && self.failed == 0
            && self.errored == 0
            && self.exit_code == Some(0)
    }

    /// Error describing an unsuccessful outcome.
    #[must_use]
    pub fn to_error(&self) -> TestFailureError {
        TestFailureError {
            passed: self.passed,
            failed: self.failed,
            errored: self.errored,
            collection_error: self.collection_error,
            exit_code: self.exit_code,
        }
    }
}

/// Inputs shared by all harness invocations.
#[derive(Debug, Clone)]
pub struct HarnessContext {
    /// Artifact root (the working directory).
    pub root: PathBuf,
    /// Base URL of the running service, when one was started.
    pub service_url: Option<String>,
    /// Port of the running service.
    pub port: Option<u16>,
    /// Bound on each runner invocation.
    pub timeout: Duration,
    /// Where to write the runner's output.
    pub log_path: PathBuf,
    /// Extra environment for the runner.
    pub env: BTreeMap<String, String>,
    /// Fetch served assets and check their content.
    pub verify_assets: bool,
}

impl HarnessContext {
    /// Creates a context rooted at `root`, logging to `log_path`.
    #[must_use]
    pub fn new(root: impl AsRef<Path>, log_path: impl AsRef<Path>, timeout: Duration) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            service_url: None,
            port: None,
            timeout,
            log_path: log_path.as_ref().to_path_buf(),
            env: BTreeMap::new(),
            verify_assets: false,
        }
    }

    /// Points the harness at a running service.
    #[must_use]
    pub fn with_service(mut self, url: impl Into<String>, port: u16) -> Self {
        let url = url.into();
        self.env.insert("PORT".to_string(), port.to_string());
        self.env.insert("APP_URL".to_string(), url.clone());
        self.service_url = Some(url);
        self.port = Some(port);
        self
    }

    /// Enables served-asset verification.
    #[must_use]
    pub fn with_asset_verification(mut self, enabled: bool) -> Self {
        self.verify_assets = enabled;
        self
    }
}

/// A language-specific test runner adapter.
#[async_trait]
pub trait TestHarness: Send + Sync {
    /// Target this harness serves.
    fn language(&self) -> Language;

    /// Name of the runner, for errors and logs.
    fn runner_name(&self) -> &'static str;

    /// Whether tests talk to the running service.
    fn requires_service(&self) -> bool {
        true
    }

    /// Test files present under `root`.
    fn discover(&self, root: &Path) -> Vec<PathBuf> {
        let file = root.join(self.language().test_file());
        if file.is_file() {
            vec![file]
        } else {
            Vec::new()
        }
    }

    /// One-time dependency installation, run before the service starts.
    async fn prepare(&self, _ctx: &HarnessContext) -> Result<(), HarnessInvocationError> {
        Ok(())
    }

    /// Runs the tests.
    async fn run(&self, ctx: &HarnessContext) -> Result<TestOutcome, HarnessInvocationError>;
}

/// The harness for `language`, running commands through `runner`.
#[must_use]
pub fn harness_for(language: Language, runner: Arc<dyn CommandRunner>) -> Arc<dyn TestHarness> {
    match language {
        Language::Html => Arc::new(BrowserHarness::new(runner)),
        Language::Python => Arc::new(PythonHarness::new(runner)),
        Language::Julia => Arc::new(JuliaHarness::new(runner)),
    }
}

/// Writes runner output to the context's log, ignoring write failures.
pub(crate) fn write_runner_log(ctx: &HarnessContext, text: &str) -> Option<PathBuf> {
    if let Some(parent) = ctx.log_path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            tracing::warn!(path = %parent.display(), error = %e, "Cannot create log directory");
            return None;
        }
    }
    match std::fs::write(&ctx.log_path, text) {
        Ok(()) => Some(ctx.log_path.clone()),
        Err(e) => {
            tracing::warn!(path = %ctx.log_path.display(), error = %e, "Cannot write runner log");
            None
        }
    }
}

//! pytest adapter for Flask services.

use super::parse::parse_pytest;
use super::{write_runner_log, HarnessContext, TestHarness, TestOutcome};
use crate::core::Language;
use crate::errors::HarnessInvocationError;
use crate::process::{CommandRunner, CommandSpec};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// pytest exit code: tests were interrupted (collection errors).
const EXIT_INTERRUPTED: i32 = 2;
/// pytest exit code: command line usage error.
const EXIT_USAGE: i32 = 4;
/// pytest exit code: no tests were collected.
const EXIT_NO_TESTS: i32 = 5;

/// Runs `pytest tests/python` with the artifact root importable.
///
/// Generated tests use Flask's test client, so they do not need the
/// service to be running.
pub struct PythonHarness {
    runner: Arc<dyn CommandRunner>,
}

impl PythonHarness {
    /// Creates the harness.
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    fn command(ctx: &HarnessContext) -> CommandSpec {
        let test_dir = Language::Python.test_dir().to_string_lossy().into_owned();
        CommandSpec::new("python3")
            .args(["-m", "pytest", test_dir.as_str(), "-v"])
            .cwd(&ctx.root)
            .env("PYTHONPATH", python_path(&ctx.root))
            .envs(ctx.env.clone())
    }
}

/// `root` prepended to any inherited `PYTHONPATH`.
fn python_path(root: &Path) -> String {
    let mut paths = vec![root.to_path_buf()];
    if let Some(existing) = std::env::var_os("PYTHONPATH") {
        paths.extend(std::env::split_paths(&existing));
    }
    std::env::join_paths(paths)
        .unwrap_or_else(|_| OsString::from(root.as_os_str()))
        .to_string_lossy()
        .into_owned()
}

fn is_collection_error(text: &str, exit_code: Option<i32>) -> bool {
    text.contains("error collecting")
        || text.contains("ERROR collecting")
        || matches!(exit_code, Some(EXIT_INTERRUPTED | EXIT_NO_TESTS))
}

#[async_trait]
impl TestHarness for PythonHarness {
    fn language(&self) -> Language {
        Language::Python
    }

    fn runner_name(&self) -> &'static str {
        "pytest"
    }

    fn requires_service(&self) -> bool {
        false
    }

    async fn run(&self, ctx: &HarnessContext) -> Result<TestOutcome, HarnessInvocationError> {
        if self.discover(&ctx.root).is_empty() {
            warn!(root = %ctx.root.display(), "No pytest file to collect");
            return Ok(TestOutcome::collection_failure(None, None));
        }

        let output = self
            .runner
            .run(&Self::command(ctx), ctx.timeout)
            .await
            .map_err(HarnessInvocationError::from)?;
        let text = output.combined();
        let log_path = write_runner_log(ctx, &text);

        if text.contains("No module named pytest") {
            return Err(HarnessInvocationError::new(
                self.runner_name(),
                "pytest is not installed for python3",
            ));
        }
        if output.exit_code == Some(EXIT_USAGE) {
            return Err(HarnessInvocationError::new(
                self.runner_name(),
                "pytest rejected its command line",
            ));
        }
        if output.timed_out {
            return Ok(TestOutcome {
                timed_out: true,
                log_path,
                ..TestOutcome::default()
            });
        }

        if is_collection_error(&text, output.exit_code) {
            warn!(exit_code = ?output.exit_code, "pytest could not collect the generated tests");
            return Ok(TestOutcome::collection_failure(output.exit_code, log_path));
        }

        let counts = parse_pytest(&text);
        info!(
            passed = counts.passed,
            failed = counts.failed,
            errored = counts.errored,
            exit_code = ?output.exit_code,
            "pytest finished"
        );
        Ok(TestOutcome {
            passed: counts.passed,
            failed: counts.failed,
            errored: counts.errored,
            skipped: counts.skipped,
            collection_error: false,
            exit_code: output.exit_code,
            timed_out: false,
            log_path,
            warnings: Vec::new(),
        })
    }
}

//! Jest adapter for the static browser page.

use super::parse::parse_jest;
use super::{write_runner_log, HarnessContext, TestHarness, TestOutcome};
use crate::core::Language;
use crate::errors::HarnessInvocationError;
use crate::process::{CommandOutput, CommandRunner, CommandSpec};
use crate::templates;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Pinned Jest packages installed during setup.
pub const JEST_PACKAGES: [&str; 2] = ["jest@29.7.0", "jest-environment-jsdom@29.7.0"];

/// Marker the served dataset must contain.
const DATASET_MARKER: &str = "Iris-setosa";

/// Runs the generated Jest suite against the served page.
pub struct BrowserHarness {
    runner: Arc<dyn CommandRunner>,
}

impl BrowserHarness {
    /// Creates the harness.
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    async fn npm(
        &self,
        ctx: &HarnessContext,
        args: &[&str],
    ) -> Result<CommandOutput, HarnessInvocationError> {
        let cmd = CommandSpec::new("npm")
            .args(args.iter().copied())
            .cwd(&ctx.root)
            .envs(ctx.env.clone());
        self.runner
            .run(&cmd, ctx.timeout)
            .await
            .map_err(HarnessInvocationError::from)
    }

    /// Fetches the served dataset and reports anything unexpected.
    async fn verify_dataset(ctx: &HarnessContext) -> Option<String> {
        let base = ctx.service_url.as_deref()?;
        let url = format!("{}/{}", base.trim_end_matches('/'), crate::DATASET_FILE);
        let client = reqwest::Client::new();
        let response = client
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .and_then(reqwest::Response::error_for_status);
        match response {
            Ok(resp) => match resp.text().await {
                Ok(body) if body.contains(DATASET_MARKER) => {
                    info!(url = %url, "Served dataset verified");
                    None
                }
                Ok(_) => Some(format!("{url} does not contain the expected dataset")),
                Err(e) => Some(format!("could not read {url}: {e}")),
            },
            Err(e) => Some(format!("could not fetch {url}: {e}")),
        }
    }
}

#[async_trait]
impl TestHarness for BrowserHarness {
    fn language(&self) -> Language {
        Language::Html
    }

    fn runner_name(&self) -> &'static str {
        "jest"
    }

    async fn prepare(&self, ctx: &HarnessContext) -> Result<(), HarnessInvocationError> {
        let manifest = ctx.root.join(Language::Html.deps_file());
        if !manifest.exists() {
            std::fs::write(&manifest, templates::package_json())
                .map_err(|e| HarnessInvocationError::new("npm", format!("cannot write package.json: {e}")))?;
        }

        let mut install_args = vec!["install", "--no-audit", "--no-fund"];
        install_args.extend(JEST_PACKAGES);
        let pinned = self.npm(ctx, &install_args).await?;
        let mut log = pinned.combined();
        if !pinned.success() {
            warn!(exit_code = ?pinned.exit_code, "Pinned npm install failed, retrying plain install");
            let plain = self.npm(ctx, &["install", "--no-audit", "--no-fund"]).await?;
            log.push('\n');
            log.push_str(&plain.combined());
            if !plain.success() {
                write_runner_log(ctx, &log);
                return Err(HarnessInvocationError::new(
                    "npm",
                    format!("npm install exited with {:?}", plain.exit_code),
                ));
            }
        }

        let listing = self.npm(ctx, &["ls", "jest", "jest-environment-jsdom"]).await?;
        log.push('\n');
        log.push_str(&listing.combined());
        write_runner_log(ctx, &log);
        if JEST_PACKAGES.iter().any(|pkg| !listing.stdout.contains(pkg)) {
            return Err(HarnessInvocationError::new(
                self.runner_name(),
                "jest and jest-environment-jsdom are not installed",
            ));
        }
        Ok(())
    }

    async fn run(&self, ctx: &HarnessContext) -> Result<TestOutcome, HarnessInvocationError> {
        if self.discover(&ctx.root).is_empty() {
            warn!(root = %ctx.root.display(), "No Jest test file to run");
            return Ok(TestOutcome::collection_failure(None, None));
        }

        let mut warnings = Vec::new();
        if ctx.verify_assets {
            if let Some(problem) = Self::verify_dataset(ctx).await {
                warn!(problem = %problem, "Served dataset check failed");
                warnings.push(problem);
            }
        }

        let mut run_ctx = ctx.clone();
        run_ctx.env.insert("CI".to_string(), "true".to_string());
        let output = self.npm(&run_ctx, &["test", "--", "--ci"]).await?;
        let text = output.combined();
        let log_path = write_runner_log(ctx, &text);

        if text.contains("jest: not found") || text.contains("Cannot find module 'jest") {
            return Err(HarnessInvocationError::new(
                self.runner_name(),
                "jest is not installed in the working directory",
            ));
        }
        if output.timed_out {
            return Ok(TestOutcome {
                timed_out: true,
                log_path,
                warnings,
                ..TestOutcome::default()
            });
        }

        let counts = parse_jest(&text);
        let suite_broken = text.contains("Test suite failed to run") || text.contains("No tests found");
        if suite_broken || (!counts.summary_found && !output.success()) {
            warn!(exit_code = ?output.exit_code, "Jest could not load the generated tests");
            let mut outcome = TestOutcome::collection_failure(output.exit_code, log_path);
            outcome.warnings = warnings;
            return Ok(outcome);
        }

        info!(
            passed = counts.passed,
            failed = counts.failed,
            exit_code = ?output.exit_code,
            "Jest finished"
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
            warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedCommandRunner;

    fn workspace() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("tests/html")).unwrap();
        std::fs::write(
            dir.path().join("tests/html/test_index.test.js"),
            "test('x', () => expect(1).toBe(1));",
        )
        .unwrap();
        dir
    }

    fn context(dir: &tempfile::TempDir) -> HarnessContext {
        HarnessContext::new(dir.path(), dir.path().join("logs/test.log"), Duration::from_secs(60))
            .with_service("http://127.0.0.1:8081", 8081)
    }

    #[tokio::test]
    async fn test_prepare_writes_manifest_and_pins_jest() {
        let dir = workspace();
        let runner = Arc::new(
            ScriptedCommandRunner::new()
                .respond(CommandOutput::new("added 300 packages", "", Some(0)))
                .respond(CommandOutput::new(
                    "app@0.1.0\n├── jest-environment-jsdom@29.7.0\n└── jest@29.7.0",
                    "",
                    Some(0),
                )),
        );
        let harness = BrowserHarness::new(runner.clone());

        harness.prepare(&context(&dir)).await.unwrap();

        let manifest = std::fs::read_to_string(dir.path().join("package.json")).unwrap();
        assert!(manifest.contains("jsdom"));
        let commands = runner.commands();
        assert!(commands[0].args.contains(&"jest@29.7.0".to_string()));
        assert_eq!(commands[1].args[0], "ls");
    }

    #[tokio::test]
    async fn test_prepare_falls_back_to_plain_install() {
        let dir = workspace();
        let runner = Arc::new(
            ScriptedCommandRunner::new()
                .respond(CommandOutput::new("", "ERESOLVE", Some(1)))
                .respond(CommandOutput::new("", "ERESOLVE", Some(1))),
        );

        let err = BrowserHarness::new(runner.clone())
            .prepare(&context(&dir))
            .await
            .unwrap_err();

        assert_eq!(err.runner, "npm");
        assert_eq!(runner.commands().len(), 2);
    }

    #[tokio::test]
    async fn test_run_parses_jest_summary() {
        let dir = workspace();
        let runner = Arc::new(ScriptedCommandRunner::new().respond(CommandOutput::new(
            "",
            "PASS tests/html/test_index.test.js\nTests:       3 passed, 3 total\n",
            Some(0),
        )));

        let outcome = BrowserHarness::new(runner.clone())
            .run(&context(&dir))
            .await
            .unwrap();

        assert!(outcome.is_success());
        assert_eq!(outcome.passed, 3);
        let cmd = &runner.commands()[0];
        assert_eq!(cmd.env["CI"], "true");
        assert_eq!(cmd.env["PORT"], "8081");
    }

    #[tokio::test]
    async fn test_broken_suite_is_collection_error() {
        let dir = workspace();
        let runner = Arc::new(ScriptedCommandRunner::new().respond(CommandOutput::new(
            "",
            "FAIL tests/html/test_index.test.js\n  ● Test suite failed to run\nTests:       0 total\n",
            Some(1),
        )));

        let outcome = BrowserHarness::new(runner).run(&context(&dir)).await.unwrap();
        assert!(outcome.collection_error);
    }
}

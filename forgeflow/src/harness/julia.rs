//! Julia `Test` adapter for Genie services.

use super::parse::parse_julia;
use super::{write_runner_log, HarnessContext, TestHarness, TestOutcome};
use crate::core::Language;
use crate::errors::HarnessInvocationError;
use crate::process::{CommandRunner, CommandSpec};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// Packages the generated service and tests depend on.
pub const JULIA_PACKAGES: [&str; 7] = ["Genie", "DataFrames", "CSV", "Test", "HTTP", "JSON3", "FilePaths"];

/// Runs the generated `test_app.jl` against the live service.
///
/// Package installation and precompilation happen in [`prepare`], so JIT
/// warm-up is not charged against the readiness budget.
///
/// [`prepare`]: TestHarness::prepare
pub struct JuliaHarness {
    runner: Arc<dyn CommandRunner>,
}

impl JuliaHarness {
    /// Creates the harness.
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    fn setup_script() -> String {
        let packages = JULIA_PACKAGES
            .iter()
            .map(|p| format!("\"{p}\""))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "using Pkg; Pkg.Registry.update(); Pkg.add([{packages}]); Pkg.instantiate(); Pkg.precompile()"
        )
    }

    fn test_script() -> String {
        let dir = Language::Julia.test_dir();
        let file = Language::Julia.test_file();
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        format!("cd(\"{}\"); include(\"{name}\")", dir.display())
    }

    fn julia(ctx: &HarnessContext, script: String) -> CommandSpec {
        CommandSpec::new("julia")
            .args(["--project=.", "-e"])
            .arg(script)
            .cwd(&ctx.root)
            .envs(ctx.env.clone())
    }
}

#[async_trait]
impl TestHarness for JuliaHarness {
    fn language(&self) -> Language {
        Language::Julia
    }

    fn runner_name(&self) -> &'static str {
        "julia"
    }

    async fn prepare(&self, ctx: &HarnessContext) -> Result<(), HarnessInvocationError> {
        let output = self
            .runner
            .run(&Self::julia(ctx, Self::setup_script()), ctx.timeout)
            .await
            .map_err(HarnessInvocationError::from)?;
        write_runner_log(ctx, &output.combined());

        if output.timed_out {
            return Err(HarnessInvocationError::new(
                self.runner_name(),
                "package installation timed out",
            ));
        }
        if !output.success() {
            return Err(HarnessInvocationError::new(
                self.runner_name(),
                format!("package installation exited with {:?}", output.exit_code),
            ));
        }
        info!("Julia packages installed and precompiled");
        Ok(())
    }

    async fn run(&self, ctx: &HarnessContext) -> Result<TestOutcome, HarnessInvocationError> {
        if ctx.service_url.is_none() {
            return Err(HarnessInvocationError::new(
                self.runner_name(),
                "the Genie service must be running before its tests",
            ));
        }
        if self.discover(&ctx.root).is_empty() {
            warn!(root = %ctx.root.display(), "No Julia test file to include");
            return Ok(TestOutcome::collection_failure(None, None));
        }

        let output = self
            .runner
            .run(&Self::julia(ctx, Self::test_script()), ctx.timeout)
            .await
            .map_err(HarnessInvocationError::from)?;
        let text = output.combined();
        let log_path = write_runner_log(ctx, &text);

        if output.timed_out {
            return Ok(TestOutcome {
                timed_out: true,
                log_path,
                ..TestOutcome::default()
            });
        }

        let counts = parse_julia(&text);
        if !counts.summary_found && !output.success() {
            warn!(exit_code = ?output.exit_code, "Julia tests failed to load");
            return Ok(TestOutcome::collection_failure(output.exit_code, log_path));
        }

        info!(
            passed = counts.passed,
            failed = counts.failed,
            errored = counts.errored,
            exit_code = ?output.exit_code,
            "Julia tests finished"
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

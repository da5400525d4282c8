//! One-time dependency installation.

use super::{RunContext, Stage};
use crate::core::{StageKind, StageOutput};
use crate::errors::ForgeflowError;
use crate::harness::HarnessContext;
use async_trait::async_trait;

/// Installs the test runner's dependencies before any service starts, so
/// install and precompile time never counts against readiness.
#[derive(Debug, Clone, Copy, Default)]
pub struct SetupStage;

#[async_trait]
impl Stage for SetupStage {
    fn kind(&self) -> StageKind {
        StageKind::Setup
    }

    async fn execute(&self, ctx: &RunContext) -> Result<StageOutput, ForgeflowError> {
        let harness = &ctx.collaborators.harness;
        let log = ctx.stage_log(StageKind::Setup);
        let hctx = HarnessContext::new(
            ctx.workdir(),
            &log,
            ctx.config().timeouts.for_stage(StageKind::Setup),
        );

        harness.prepare(&hctx).await?;

        let output =
            StageOutput::ok().with_data("runner", serde_json::json!(harness.runner_name()));
        Ok(if log.exists() {
            output.with_output_ref(&log)
        } else {
            output
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkflowConfig;
    use crate::core::Language;
    use crate::testing::{context, stub_collaborators, FakeHarness};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_prepares_harness() {
        let dir = tempfile::tempdir().unwrap();
        let harness = Arc::new(FakeHarness::passing(Language::Julia, 1));
        let mut collaborators = stub_collaborators(Language::Julia);
        collaborators.harness = harness.clone();
        let ctx = context(WorkflowConfig::new(Language::Julia, dir.path()), collaborators);

        let output = SetupStage.execute(&ctx).await.unwrap();

        assert_eq!(harness.prepare_calls(), 1);
        assert_eq!(output.get("runner").unwrap(), "fake");
    }

    #[tokio::test]
    async fn test_install_failure_fails_stage() {
        let dir = tempfile::tempdir().unwrap();
        let mut collaborators = stub_collaborators(Language::Html);
        collaborators.harness = Arc::new(FakeHarness::passing(Language::Html, 1).failing_prepare());
        let ctx = context(WorkflowConfig::new(Language::Html, dir.path()), collaborators);

        let err = SetupStage.execute(&ctx).await.unwrap_err();
        assert_eq!(err.kind(), "harness_invocation_error");
    }
}

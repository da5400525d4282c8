//! CI workflow file.

use super::{write_artifact, RunContext, Stage};
use crate::core::{StageKind, StageOutput};
use crate::errors::ForgeflowError;
use crate::templates;
use async_trait::async_trait;
use std::path::Path;

/// Writes the GitHub Actions workflow testing the language target.
#[derive(Debug, Clone, Copy, Default)]
pub struct CiStage;

#[async_trait]
impl Stage for CiStage {
    fn kind(&self) -> StageKind {
        StageKind::Ci
    }

    async fn execute(&self, ctx: &RunContext) -> Result<StageOutput, ForgeflowError> {
        let workflow = templates::ci_workflow(ctx.language(), &ctx.config().branch);
        let artifact =
            write_artifact(ctx.workdir(), Path::new(crate::CI_WORKFLOW_FILE), &workflow)?;
        Ok(StageOutput::ok().with_artifact(artifact))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkflowConfig;
    use crate::core::Language;
    use crate::testing::{context, stub_collaborators};

    #[tokio::test]
    async fn test_writes_workflow() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(
            WorkflowConfig::new(Language::Julia, dir.path()),
            stub_collaborators(Language::Julia),
        );

        let output = CiStage.execute(&ctx).await.unwrap();

        let workflow =
            std::fs::read_to_string(dir.path().join(".github/workflows/ci.yml")).unwrap();
        assert!(workflow.contains("setup-julia"));
        assert_eq!(output.artifacts[0].path, Path::new(crate::CI_WORKFLOW_FILE));
    }
}

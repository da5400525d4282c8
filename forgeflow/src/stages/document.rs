//! README generation.

use super::{write_artifact, RunContext, Stage};
use crate::collaborators::{clean_markdown, GenerationRequest};
use crate::core::{StageKind, StageOutput};
use crate::errors::{ForgeflowError, GenerationError};
use crate::templates;
use async_trait::async_trait;
use std::path::Path;

/// Generates `README.md` with the doc model.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentStage;

#[async_trait]
impl Stage for DocumentStage {
    fn kind(&self) -> StageKind {
        StageKind::Document
    }

    async fn execute(&self, ctx: &RunContext) -> Result<StageOutput, ForgeflowError> {
        let request = GenerationRequest::new(templates::doc_prompt(ctx.language()), "markdown")
            .with_model(ctx.config().models.doc.clone());
        let generated = ctx.collaborators.generator.generate(request).await?;
        let readme = clean_markdown(&generated.text);
        if readme.trim().is_empty() {
            return Err(GenerationError::new("empty README response").into());
        }

        let artifact = write_artifact(ctx.workdir(), Path::new(crate::README_FILE), &readme)?;
        Ok(StageOutput::ok()
            .with_data("model", serde_json::json!(generated.model))
            .with_artifact(artifact))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{GeneratedText, MockCodeGenerator};
    use crate::config::WorkflowConfig;
    use crate::core::Language;
    use crate::errors::GenerationError;
    use crate::testing::{context, stub_collaborators};
    use std::sync::Arc;

    fn ctx_with(dir: &Path, generator: MockCodeGenerator) -> Arc<RunContext> {
        let mut collaborators = stub_collaborators(Language::Python);
        collaborators.generator = Arc::new(generator);
        context(WorkflowConfig::new(Language::Python, dir), collaborators)
    }

    #[tokio::test]
    async fn test_writes_unfenced_readme() {
        let dir = tempfile::tempdir().unwrap();
        let mut generator = MockCodeGenerator::new();
        generator
            .expect_generate()
            .withf(|req| req.language == "markdown")
            .returning(|_| {
                Ok(GeneratedText {
                    text: "```markdown\n# Iris API\n\nRun it.\n```".into(),
                    model: "writer".into(),
                })
            });
        let ctx = ctx_with(dir.path(), generator);

        let output = DocumentStage.execute(&ctx).await.unwrap();

        let readme = std::fs::read_to_string(dir.path().join("README.md")).unwrap();
        assert!(readme.starts_with("# Iris API"));
        assert_eq!(output.artifacts.len(), 1);
    }

    #[tokio::test]
    async fn test_service_failure_fails_stage() {
        let dir = tempfile::tempdir().unwrap();
        let mut generator = MockCodeGenerator::new();
        generator
            .expect_generate()
            .returning(|_| Err(GenerationError::new("service unavailable").with_status(503)));
        let ctx = ctx_with(dir.path(), generator);

        let err = DocumentStage.execute(&ctx).await.unwrap_err();
        assert_eq!(err.kind(), "generation_error");
        assert!(!dir.path().join("README.md").exists());
    }
}

//! Service, test and manifest generation.

use super::{write_artifact, RunContext, Stage};
use crate::collaborators::{clean_code_output, GenerationRequest};
use crate::core::{Language, StageKind, StageOutput};
use crate::errors::{ForgeflowError, GenerationError};
use crate::templates;
use async_trait::async_trait;
use std::path::Path;
use tracing::info;

/// Generates the service and its tests, then writes the dependency
/// manifest.
///
/// The code model override applies to the service, the doc model override
/// to the tests. Responses are cleaned before writing; a response with
/// nothing left after cleaning fails the stage.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenerateStage;

impl GenerateStage {
    async fn generate_source(
        ctx: &RunContext,
        what: &str,
        request: GenerationRequest,
    ) -> Result<(String, String), ForgeflowError> {
        let generated = ctx.collaborators.generator.generate(request).await?;
        let cleaned = clean_code_output(&generated.text);
        if cleaned.trim().is_empty() {
            return Err(GenerationError::new(format!(
                "empty {what} after cleaning the response from model '{}'",
                generated.model
            ))
            .into());
        }
        info!(what, model = %generated.model, lines = cleaned.lines().count(), "Generated source");
        Ok((cleaned, generated.model))
    }
}

#[async_trait]
impl Stage for GenerateStage {
    fn kind(&self) -> StageKind {
        StageKind::Generate
    }

    async fn execute(&self, ctx: &RunContext) -> Result<StageOutput, ForgeflowError> {
        let language = ctx.language();
        let models = &ctx.config().models;
        let root = ctx.workdir();

        let (code, code_model) = Self::generate_source(
            ctx,
            "service code",
            GenerationRequest::new(templates::code_prompt(language), language.as_str())
                .with_model(models.code.clone()),
        )
        .await?;
        let (tests, test_model) = Self::generate_source(
            ctx,
            "tests",
            GenerationRequest::new(templates::test_prompt(language), language.test_source_language())
                .with_model(models.doc.clone()),
        )
        .await?;

        let mut output = StageOutput::ok()
            .with_data("code_model", serde_json::json!(code_model))
            .with_data("test_model", serde_json::json!(test_model))
            .with_artifact(write_artifact(root, Path::new(language.entry_file()), &code)?)
            .with_artifact(write_artifact(root, &language.test_file(), &tests)?);

        match language {
            Language::Python => {
                output = output
                    .with_artifact(write_artifact(
                        root,
                        &language.test_dir().join("__init__.py"),
                        "",
                    )?)
                    .with_artifact(write_artifact(
                        root,
                        Path::new(language.deps_file()),
                        templates::REQUIREMENTS_TXT,
                    )?);
            }
            Language::Html => {
                output = output.with_artifact(write_artifact(
                    root,
                    Path::new(language.deps_file()),
                    &templates::package_json(),
                )?);
            }
            // Project.toml is written by Pkg during setup.
            Language::Julia => {}
        }

        let files = output.artifacts.len();
        Ok(output.with_data("files", serde_json::json!(files)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{GeneratedText, MockCodeGenerator};
    use crate::config::{ModelOverrides, WorkflowConfig};
    use crate::testing::{context, stub_collaborators};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_writes_python_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(
            WorkflowConfig::new(Language::Python, dir.path()),
            stub_collaborators(Language::Python),
        );

        let output = GenerateStage.execute(&ctx).await.unwrap();

        let paths: Vec<_> = output.artifacts.iter().map(|a| a.path.clone()).collect();
        assert_eq!(
            paths,
            vec![
                Path::new("app.py").to_path_buf(),
                Path::new("tests/python/test_app.py").to_path_buf(),
                Path::new("tests/python/__init__.py").to_path_buf(),
                Path::new("requirements.txt").to_path_buf(),
            ]
        );
        assert_eq!(output.get("files"), Some(&serde_json::json!(4)));
        let requirements = std::fs::read_to_string(dir.path().join("requirements.txt")).unwrap();
        assert!(requirements.contains("flask"));
    }

    #[tokio::test]
    async fn test_cleans_fenced_response() {
        let dir = tempfile::tempdir().unwrap();
        let mut generator = MockCodeGenerator::new();
        generator.expect_generate().returning(|req| {
            Ok(GeneratedText {
                text: format!("Here is the code:\n```{}\nprint('hi')\n```\n", req.language),
                model: "m".to_string(),
            })
        });
        let mut collaborators = stub_collaborators(Language::Julia);
        collaborators.generator = Arc::new(generator);
        let ctx = context(WorkflowConfig::new(Language::Julia, dir.path()), collaborators);

        GenerateStage.execute(&ctx).await.unwrap();

        let app = std::fs::read_to_string(dir.path().join("app.jl")).unwrap();
        assert_eq!(app.trim(), "print('hi')");
        assert!(!dir.path().join("Project.toml").exists());
    }

    #[tokio::test]
    async fn test_model_overrides_per_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let mut generator = MockCodeGenerator::new();
        generator
            .expect_generate()
            .withf(|req| req.language == "html" && req.model.as_deref() == Some("coder"))
            .times(1)
            .returning(|_| Ok(GeneratedText { text: "<html></html>".into(), model: "coder".into() }));
        generator
            .expect_generate()
            .withf(|req| req.language == "javascript" && req.model.as_deref() == Some("writer"))
            .times(1)
            .returning(|_| Ok(GeneratedText { text: "test('x', () => {});".into(), model: "writer".into() }));

        let mut collaborators = stub_collaborators(Language::Html);
        collaborators.generator = Arc::new(generator);
        let config = WorkflowConfig::new(Language::Html, dir.path()).with_models(ModelOverrides {
            code: Some("coder".into()),
            doc: Some("writer".into()),
            ..ModelOverrides::default()
        });
        let ctx = context(config, collaborators);

        let output = GenerateStage.execute(&ctx).await.unwrap();
        assert_eq!(output.get("test_model").unwrap(), "writer");
        assert!(dir.path().join("package.json").exists());
    }

    #[tokio::test]
    async fn test_empty_response_is_generation_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut generator = MockCodeGenerator::new();
        generator.expect_generate().returning(|_| {
            Ok(GeneratedText {
                text: "Certainly! I cannot help with that.\n".into(),
                model: "m".into(),
            })
        });
        let mut collaborators = stub_collaborators(Language::Python);
        collaborators.generator = Arc::new(generator);
        let ctx = context(WorkflowConfig::new(Language::Python, dir.path()), collaborators);

        let err = GenerateStage.execute(&ctx).await.unwrap_err();
        assert_eq!(err.kind(), "generation_error");
        assert!(!dir.path().join("app.py").exists());
    }
}

//! Commit and push of the generated artifacts.

use super::{RunContext, Stage};
use crate::core::{StageKind, StageOutput};
use crate::errors::ForgeflowError;
use async_trait::async_trait;
use tracing::info;

/// Remote the workspace repository pushes to.
const REMOTE: &str = "origin";

/// Commits every artifact of the language target and pushes when a remote
/// URL is configured.
///
/// A push failure fails this stage only; the test results recorded before
/// it stand.
#[derive(Debug, Clone, Copy, Default)]
pub struct PublishStage;

#[async_trait]
impl Stage for PublishStage {
    fn kind(&self) -> StageKind {
        StageKind::Publish
    }

    async fn execute(&self, ctx: &RunContext) -> Result<StageOutput, ForgeflowError> {
        let config = ctx.config();
        let root = ctx.workdir().to_path_buf();
        let vcs = &ctx.collaborators.vcs;
        let files: Vec<_> = ctx
            .language()
            .publishable_files()
            .into_iter()
            .filter(|f| root.join(f).exists())
            .collect();

        let commit = vcs
            .commit(root.clone(), files.clone(), config.commit_message.clone())
            .await?;
        match &commit {
            Some(id) => info!(commit = %id, files = files.len(), "Artifacts committed"),
            None => info!("Nothing to commit"),
        }

        let mut output = StageOutput::ok()
            .with_data("files", serde_json::json!(files))
            .with_data("commit", serde_json::json!(commit));

        if config.remote_url.is_some() {
            vcs.push(root, REMOTE.to_string(), config.branch.clone())
                .await?;
            info!(remote = REMOTE, branch = %config.branch, "Pushed");
            output = output.with_data("pushed", serde_json::json!(true));
        } else {
            output = output
                .with_data("pushed", serde_json::json!(false))
                .with_warning("no remote URL configured; skipped push");
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::MockVcsClient;
    use crate::config::WorkflowConfig;
    use crate::core::Language;
    use crate::errors::{VcsError, VcsOperation};
    use crate::testing::{context, stub_collaborators};
    use mockall::predicate::eq;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn ctx_with(config: WorkflowConfig, vcs: MockVcsClient) -> Arc<RunContext> {
        let mut collaborators = stub_collaborators(config.language);
        collaborators.vcs = Arc::new(vcs);
        context(config, collaborators)
    }

    #[tokio::test]
    async fn test_commits_existing_artifacts_and_pushes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("app.py"), "print()").unwrap();
        std::fs::write(dir.path().join("README.md"), "# x").unwrap();

        let mut vcs = MockVcsClient::new();
        vcs.expect_commit()
            .withf(|_, files, _| {
                files == &vec![PathBuf::from("app.py"), PathBuf::from("README.md")]
            })
            .times(1)
            .returning(|_, _, _| Ok(Some("abc123".to_string())));
        vcs.expect_push()
            .with(mockall::predicate::always(), eq("origin".to_string()), eq("main".to_string()))
            .times(1)
            .returning(|_, _, _| Ok(()));

        let config = WorkflowConfig::new(Language::Python, dir.path())
            .with_remote_url("https://github.com/me/demo.git");
        let output = PublishStage.execute(&ctx_with(config, vcs)).await.unwrap();

        assert_eq!(output.get("commit").unwrap(), "abc123");
        assert_eq!(output.get("pushed"), Some(&serde_json::json!(true)));
    }

    #[tokio::test]
    async fn test_no_remote_skips_push() {
        let dir = tempfile::tempdir().unwrap();
        let mut vcs = MockVcsClient::new();
        vcs.expect_commit().returning(|_, _, _| Ok(None));
        vcs.expect_push().never();

        let output = PublishStage
            .execute(&ctx_with(WorkflowConfig::new(Language::Julia, dir.path()), vcs))
            .await
            .unwrap();

        assert_eq!(output.get("commit"), Some(&serde_json::Value::Null));
        assert_eq!(output.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_push_failure_is_vcs_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut vcs = MockVcsClient::new();
        vcs.expect_commit().returning(|_, _, _| Ok(Some("abc".to_string())));
        vcs.expect_push()
            .returning(|_, _, _| Err(VcsError::new(VcsOperation::Push, "rejected")));

        let config =
            WorkflowConfig::new(Language::Html, dir.path()).with_remote_url("git@example.com:x.git");
        let err = PublishStage.execute(&ctx_with(config, vcs)).await.unwrap_err();

        assert_eq!(err.kind(), "vcs_error");
        assert!(err.to_string().contains("push"));
    }
}

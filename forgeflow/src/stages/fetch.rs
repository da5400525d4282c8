//! Workspace repository preparation and dataset download.

use super::{RunContext, Stage};
use crate::core::{StageArtifact, StageKind, StageOutput};
use crate::errors::{ForgeflowError, VcsOperation};
use async_trait::async_trait;
use tracing::{info, warn};

/// Prepares the working directory.
///
/// Initializes the repository on the configured branch, points `origin` at
/// the remote, forks and clones the fork source when one is configured, and
/// downloads the dataset for targets that serve it. A remote that cannot be
/// configured or a dataset that cannot be downloaded only produces a
/// warning; later stages work without them.
#[derive(Debug, Clone, Copy, Default)]
pub struct FetchStage;

#[async_trait]
impl Stage for FetchStage {
    fn kind(&self) -> StageKind {
        StageKind::Fetch
    }

    async fn execute(&self, ctx: &RunContext) -> Result<StageOutput, ForgeflowError> {
        let config = ctx.config();
        let root = ctx.workdir().to_path_buf();
        tokio::fs::create_dir_all(&root).await?;
        let vcs = &ctx.collaborators.vcs;
        let mut output = StageOutput::ok();

        match vcs
            .prepare(root.clone(), config.branch.clone(), config.remote_url.clone())
            .await
        {
            Ok(()) => {}
            Err(e) if e.operation == VcsOperation::Remote => {
                warn!(error = %e, "Continuing without a configured remote");
                output = output.with_warning(e.to_string());
            }
            Err(e) => return Err(e.into()),
        }

        if let Some(source) = &config.fork_repo {
            let repo = vcs.fork(source.clone()).await?;
            let dest = root.join(&repo.name);
            let cloned = vcs.clone_repo(repo.clone(), dest.clone()).await?;
            info!(repo = %repo.full_name(), path = %dest.display(), cloned, "Fork source ready");
            output = output
                .with_data("fork", serde_json::json!(repo.full_name()))
                .with_data("clone_path", serde_json::json!(dest))
                .with_data("cloned", serde_json::json!(cloned));
        }

        if ctx.language().needs_dataset() {
            let dest = root.join(crate::DATASET_FILE);
            match ctx
                .collaborators
                .dataset
                .download(&config.dataset_urls, &dest)
                .await
            {
                Ok(download) => {
                    let bytes = tokio::fs::read(&dest).await?;
                    output = output
                        .with_data("dataset", serde_json::to_value(&download)?)
                        .with_artifact(StageArtifact::from_content(crate::DATASET_FILE, &bytes));
                }
                Err(e) => {
                    warn!(error = %e, "Continuing without the dataset");
                    output = output.with_warning(e.to_string());
                }
            }
        }

        Ok(output)
    }
}

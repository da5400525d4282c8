//! Version-control collaborator contract.

use crate::errors::{VcsError, VcsOperation};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A repository on the hosting service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoRef {
    /// Owning account.
    pub owner: String,
    /// Repository name.
    pub name: String,
    /// URL to clone from.
    pub clone_url: String,
}

impl RepoRef {
    /// Splits an `owner/repo` source into its parts.
    pub fn parse_source(source: &str) -> Result<(String, String), VcsError> {
        match source.trim().split('/').collect::<Vec<_>>().as_slice() {
            [owner, name] if !owner.is_empty() && !name.is_empty() => {
                Ok(((*owner).to_string(), (*name).to_string()))
            }
            _ => Err(VcsError::new(
                VcsOperation::Fork,
                format!("invalid repository '{source}', expected owner/repo"),
            )),
        }
    }

    /// `owner/name`.
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

/// Repository operations used by the fetch and publish stages.
///
/// Each operation fails with its own [`VcsOperation`], so a failed push can
/// be told apart from a failed commit in the report.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VcsClient: Send + Sync {
    /// Makes `path` a repository on `branch`, pointing `origin` at
    /// `remote_url` when given.
    async fn prepare(
        &self,
        path: PathBuf,
        branch: String,
        remote_url: Option<String>,
    ) -> Result<(), VcsError>;

    /// Forks `owner/repo` into the authenticated account.
    async fn fork(&self, source: String) -> Result<RepoRef, VcsError>;

    /// Clones `repo` into `dest`. Returns `false` when `dest` already exists
    /// and nothing was cloned.
    async fn clone_repo(&self, repo: RepoRef, dest: PathBuf) -> Result<bool, VcsError>;

    /// Stages `files` and commits them. Returns the new commit id, or `None`
    /// when there was nothing to commit.
    async fn commit(
        &self,
        path: PathBuf,
        files: Vec<PathBuf>,
        message: String,
    ) -> Result<Option<String>, VcsError>;

    /// Pushes `branch` to `remote`.
    async fn push(&self, path: PathBuf, remote: String, branch: String) -> Result<(), VcsError>;
}

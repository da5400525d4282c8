//! `git` command-line client with GitHub forking.

use super::vcs::{RepoRef, VcsClient};
use crate::errors::{VcsError, VcsOperation};
use crate::process::{CommandOutput, CommandRunner, CommandSpec};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const GITHUB_API: &str = "https://api.github.com";
const GIT_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Deserialize)]
struct ForkResponse {
    name: String,
    clone_url: String,
    owner: ForkOwner,
}

#[derive(Debug, Deserialize)]
struct ForkOwner {
    login: String,
}

/// [`VcsClient`] that shells out to `git`.
#[derive(Clone)]
pub struct GitCli {
    runner: Arc<dyn CommandRunner>,
    http: reqwest::Client,
    github_api: String,
    token: Option<String>,
    timeout: Duration,
}

impl std::fmt::Debug for GitCli {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitCli")
            .field("github_api", &self.github_api)
            .field("has_token", &self.token.is_some())
            .finish_non_exhaustive()
    }
}

impl GitCli {
    /// Creates a client running `git` through `runner`.
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            http: reqwest::Client::new(),
            github_api: GITHUB_API.to_string(),
            token: None,
            timeout: GIT_TIMEOUT,
        }
    }

    /// Sets the GitHub token used for forking.
    #[must_use]
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    /// Points the fork call at another API host.
    #[must_use]
    pub fn with_github_api(mut self, base: impl Into<String>) -> Self {
        self.github_api = base.into();
        self
    }

    async fn git(
        &self,
        operation: VcsOperation,
        cwd: &Path,
        args: &[&str],
    ) -> Result<CommandOutput, VcsError> {
        let cmd = CommandSpec::new("git").args(args.iter().copied()).cwd(cwd);
        let output = self
            .runner
            .run(&cmd, self.timeout)
            .await
            .map_err(|e| VcsError::new(operation, e.to_string()))?;
        if output.timed_out {
            return Err(VcsError::new(operation, format!("`{cmd}` timed out")));
        }
        Ok(output)
    }

    async fn git_ok(&self, operation: VcsOperation, cwd: &Path, args: &[&str]) -> Result<String, VcsError> {
        let output = self.git(operation, cwd, args).await?;
        if output.success() {
            return Ok(output.stdout.trim().to_string());
        }
        let detail = if output.stderr.trim().is_empty() {
            output.stdout.trim()
        } else {
            output.stderr.trim()
        };
        Err(VcsError::new(
            operation,
            format!("git {} exited with {:?}: {detail}", args.join(" "), output.exit_code),
        ))
    }
}

#[async_trait]
impl VcsClient for GitCli {
    async fn prepare(
        &self,
        path: PathBuf,
        branch: String,
        remote_url: Option<String>,
    ) -> Result<(), VcsError> {
        std::fs::create_dir_all(&path).map_err(|e| VcsError::new(VcsOperation::Init, e.to_string()))?;
        if path.join(".git").exists() {
            info!(path = %path.display(), "Existing repository found");
        } else {
            self.git_ok(VcsOperation::Init, &path, &["init"]).await?;
            info!(path = %path.display(), "Initialized repository");
        }

        let current = self
            .git(VcsOperation::Init, &path, &["symbolic-ref", "--short", "HEAD"])
            .await?;
        if current.stdout.trim() != branch {
            self.git_ok(VcsOperation::Init, &path, &["checkout", "-B", &branch])
                .await?;
            info!(branch = %branch, "Switched branch");
        }

        if let Some(url) = remote_url {
            let existing = self
                .git(VcsOperation::Remote, &path, &["remote", "get-url", "origin"])
                .await?;
            if existing.success() {
                self.git_ok(VcsOperation::Remote, &path, &["remote", "set-url", "origin", &url])
                    .await?;
            } else {
                self.git_ok(VcsOperation::Remote, &path, &["remote", "add", "origin", &url])
                    .await?;
            }
            info!(remote = %url, "Remote 'origin' configured");
        }
        Ok(())
    }

    async fn fork(&self, source: String) -> Result<RepoRef, VcsError> {
        let (owner, name) = RepoRef::parse_source(&source)?;
        let token = self.token.as_deref().ok_or_else(|| {
            VcsError::new(
                VcsOperation::Fork,
                format!("{} is not set", crate::config::GITHUB_TOKEN_ENV),
            )
        })?;

        let url = format!("{}/repos/{owner}/{name}/forks", self.github_api.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .header(reqwest::header::USER_AGENT, "forgeflow")
            .send()
            .await
            .map_err(|e| VcsError::new(VcsOperation::Fork, e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VcsError::new(
                VcsOperation::Fork,
                format!("{source}: HTTP {status}: {body}"),
            ));
        }
        let fork: ForkResponse = response
            .json()
            .await
            .map_err(|e| VcsError::new(VcsOperation::Fork, e.to_string()))?;

        let repo = RepoRef {
            owner: fork.owner.login,
            name: fork.name,
            clone_url: fork.clone_url,
        };
        info!(source = %source, fork = %repo.full_name(), "Forked repository");
        Ok(repo)
    }

    async fn clone_repo(&self, repo: RepoRef, dest: PathBuf) -> Result<bool, VcsError> {
        if dest.exists() {
            warn!(path = %dest.display(), "Clone target exists, skipping clone");
            return Ok(false);
        }
        let parent = dest
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        let dest_str = dest.to_string_lossy().into_owned();
        self.git_ok(VcsOperation::Clone, &parent, &["clone", &repo.clone_url, &dest_str])
            .await?;
        info!(repo = %repo.full_name(), path = %dest.display(), "Cloned repository");
        Ok(true)
    }

    async fn commit(
        &self,
        path: PathBuf,
        files: Vec<PathBuf>,
        message: String,
    ) -> Result<Option<String>, VcsError> {
        let present: Vec<String> = files
            .iter()
            .filter(|f| path.join(f).exists())
            .map(|f| f.to_string_lossy().into_owned())
            .collect();
        if present.is_empty() {
            warn!("No artifacts to commit");
            return Ok(None);
        }

        let mut add: Vec<&str> = vec!["add", "--"];
        add.extend(present.iter().map(String::as_str));
        self.git_ok(VcsOperation::Commit, &path, &add).await?;

        let staged = self
            .git(VcsOperation::Commit, &path, &["diff", "--cached", "--quiet"])
            .await?;
        if staged.exit_code == Some(0) {
            info!("Nothing staged, skipping commit");
            return Ok(None);
        }

        self.git_ok(VcsOperation::Commit, &path, &["commit", "-m", &message])
            .await?;
        let sha = self
            .git_ok(VcsOperation::Commit, &path, &["rev-parse", "HEAD"])
            .await?;
        info!(commit = %sha, files = present.len(), "Committed artifacts");
        Ok(Some(sha))
    }

    async fn push(&self, path: PathBuf, remote: String, branch: String) -> Result<(), VcsError> {
        self.git_ok(VcsOperation::Push, &path, &["push", "-u", &remote, &branch])
            .await?;
        info!(remote = %remote, branch = %branch, "Pushed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedCommandRunner;

    fn ok(stdout: &str) -> CommandOutput {
        CommandOutput::new(stdout, "", Some(0))
    }

    #[tokio::test]
    async fn test_prepare_fresh_directory() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(
            ScriptedCommandRunner::new()
                .respond(ok("Initialized empty Git repository"))
                .respond(ok("master"))
                .respond(ok(""))
                .respond(CommandOutput::new("", "error: No such remote 'origin'", Some(2)))
                .respond(ok("")),
        );
        let git = GitCli::new(runner.clone());

        git.prepare(
            dir.path().to_path_buf(),
            "main".into(),
            Some("https://example.com/repo.git".into()),
        )
        .await
        .unwrap();

        let args: Vec<Vec<String>> = runner.commands().into_iter().map(|c| c.args).collect();
        assert_eq!(args[0], ["init"]);
        assert_eq!(args[2], ["checkout", "-B", "main"]);
        assert_eq!(args[4], ["remote", "add", "origin", "https://example.com/repo.git"]);
    }

    #[tokio::test]
    async fn test_commit_with_nothing_staged() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("app.py"), "print(1)").unwrap();
        let runner = Arc::new(
            ScriptedCommandRunner::new()
                .respond(ok(""))
                .respond(ok("")),
        );

        let sha = GitCli::new(runner.clone())
            .commit(
                dir.path().to_path_buf(),
                vec![PathBuf::from("app.py"), PathBuf::from("missing.txt")],
                "msg".into(),
            )
            .await
            .unwrap();

        assert!(sha.is_none());
        let commands = runner.commands();
        assert_eq!(commands[0].args, ["add", "--", "app.py"]);
        assert_eq!(commands.len(), 2);
    }

    #[tokio::test]
    async fn test_commit_returns_sha() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("app.py"), "print(1)").unwrap();
        let runner = Arc::new(
            ScriptedCommandRunner::new()
                .respond(ok(""))
                .respond(CommandOutput::new("", "", Some(1)))
                .respond(ok("[main abc123] msg"))
                .respond(ok("abc123def\n")),
        );

        let sha = GitCli::new(runner)
            .commit(dir.path().to_path_buf(), vec![PathBuf::from("app.py")], "msg".into())
            .await
            .unwrap();
        assert_eq!(sha.as_deref(), Some("abc123def"));
    }

    #[tokio::test]
    async fn test_push_failure_is_push_error() {
        let runner = Arc::new(ScriptedCommandRunner::new().respond(CommandOutput::new(
            "",
            "! [rejected] main -> main (fetch first)",
            Some(1),
        )));
        let err = GitCli::new(runner)
            .push(PathBuf::from("."), "origin".into(), "main".into())
            .await
            .unwrap_err();
        assert_eq!(err.operation, VcsOperation::Push);
        assert!(err.message.contains("rejected"));
    }

    #[tokio::test]
    async fn test_fork_requires_token() {
        let git = GitCli::new(Arc::new(ScriptedCommandRunner::new()));
        let err = git.fork("nobulart/aix".into()).await.unwrap_err();
        assert_eq!(err.operation, VcsOperation::Fork);
        assert!(err.message.contains("GITHUB_TOKEN"));
    }

    #[tokio::test]
    async fn test_clone_skipped_when_target_exists() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedCommandRunner::new());
        let repo = RepoRef {
            owner: "me".into(),
            name: "aix".into(),
            clone_url: "https://github.com/me/aix.git".into(),
        };
        let cloned = GitCli::new(runner.clone())
            .clone_repo(repo, dir.path().to_path_buf())
            .await
            .unwrap();
        assert!(!cloned);
        assert!(runner.commands().is_empty());
    }
}

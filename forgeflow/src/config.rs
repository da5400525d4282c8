//! Workflow configuration.
//!
//! A [`WorkflowConfig`] is built once (from the CLI or with builder methods),
//! validated, and then shared read-only by every stage of a run.

use crate::core::{Language, StageKind};
use crate::errors::ForgeflowError;
use crate::ports::PortRange;
use crate::readiness::ProbePolicy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Environment variable holding the generation service key.
pub const API_KEY_ENV: &str = "ANYTHINGLLM_API_KEY";
/// Environment variable holding the GitHub token used for forking.
pub const GITHUB_TOKEN_ENV: &str = "GITHUB_TOKEN";

/// Default dataset mirrors, tried in order.
pub const DEFAULT_DATASET_URLS: [&str; 2] = [
    "https://archive.ics.uci.edu/ml/machine-learning-databases/iris/iris.data",
    "https://raw.githubusercontent.com/pandas-dev/pandas/main/pandas/tests/io/data/csv/iris.csv",
];

/// How prompts are sent to the generation workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ChatMode {
    /// Plain chat completion.
    #[default]
    Chat,
    /// Agent mode; needs an agent provider on the workspace.
    Agent,
}

impl ChatMode {
    /// Wire name of the mode.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Agent => "agent",
        }
    }
}

impl fmt::Display for ChatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChatMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chat" => Ok(Self::Chat),
            "agent" => Ok(Self::Agent),
            other => Err(format!("unknown mode '{other}' (expected chat or agent)")),
        }
    }
}

/// Per-call model overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelOverrides {
    /// Model for service code.
    pub code: Option<String>,
    /// Model for tests and the README.
    pub doc: Option<String>,
    /// Default model in chat mode.
    pub chat: Option<String>,
    /// Default model in agent mode.
    pub agent: Option<String>,
}

/// Timeouts bounding each stage, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTimeouts {
    /// Repository preparation and dataset download.
    pub fetch_secs: u64,
    /// Code and test generation.
    pub generate_secs: u64,
    /// Dependency installation.
    pub setup_secs: u64,
    /// Service launch.
    pub serve_secs: u64,
    /// Readiness polling.
    pub probe_secs: u64,
    /// Test runner invocation.
    pub test_secs: u64,
    /// README generation.
    pub document_secs: u64,
    /// CI workflow rendering.
    pub ci_secs: u64,
    /// Commit and push.
    pub publish_secs: u64,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            fetch_secs: 300,
            generate_secs: 600,
            setup_secs: 900,
            serve_secs: 30,
            probe_secs: 180,
            test_secs: 600,
            document_secs: 600,
            ci_secs: 30,
            publish_secs: 120,
        }
    }
}

impl StageTimeouts {
    /// Timeout for `stage`.
    #[must_use]
    pub const fn for_stage(&self, stage: StageKind) -> Duration {
        let secs = match stage {
            StageKind::Fetch => self.fetch_secs,
            StageKind::Generate => self.generate_secs,
            StageKind::Setup => self.setup_secs,
            StageKind::Serve => self.serve_secs,
            StageKind::Probe => self.probe_secs,
            StageKind::Test => self.test_secs,
            StageKind::Document => self.document_secs,
            StageKind::Ci => self.ci_secs,
            StageKind::Publish => self.publish_secs,
        };
        Duration::from_secs(secs)
    }

    /// Sets every timeout to `timeout`.
    #[must_use]
    pub fn uniform(timeout: Duration) -> Self {
        let secs = timeout.as_secs().max(1);
        Self {
            fetch_secs: secs,
            generate_secs: secs,
            setup_secs: secs,
            serve_secs: secs,
            probe_secs: secs,
            test_secs: secs,
            document_secs: secs,
            ci_secs: secs,
            publish_secs: secs,
        }
    }
}

/// Configuration for one workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Target ecosystem.
    pub language: Language,
    /// Artifact root and repository path.
    pub working_dir: PathBuf,
    /// Generation service base URL.
    pub api_base: String,
    /// Generation workspace slug.
    pub workspace: String,
    /// Chat or agent mode.
    pub mode: ChatMode,
    /// Model overrides.
    pub models: ModelOverrides,
    /// `owner/repo` to fork and clone.
    pub fork_repo: Option<String>,
    /// Remote pushed to by the publish stage.
    pub remote_url: Option<String>,
    /// Branch committed to and pushed.
    pub branch: String,
    /// Preferred service port.
    pub http_port: Option<u16>,
    /// Range scanned when the preferred port is taken.
    pub port_range: PortRange,
    /// Per-stage timeouts.
    pub timeouts: StageTimeouts,
    /// Grace period between the terminate signal and the kill, in ms.
    pub grace_timeout_ms: u64,
    /// Readiness policy; the language default when unset.
    pub probe: Option<ProbePolicy>,
    /// Dataset mirrors, tried in order.
    pub dataset_urls: Vec<String>,
    /// Commit message for the publish stage.
    pub commit_message: String,
    /// Fetch served assets during browser tests.
    pub verify_assets: bool,
    /// Generation service key.
    #[serde(skip)]
    pub api_key: Option<String>,
    /// GitHub token for forking.
    #[serde(skip)]
    pub github_token: Option<String>,
}

impl WorkflowConfig {
    /// Creates a configuration with defaults for `language` rooted at
    /// `working_dir`.
    #[must_use]
    pub fn new(language: Language, working_dir: impl AsRef<Path>) -> Self {
        Self {
            language,
            working_dir: working_dir.as_ref().to_path_buf(),
            api_base: "http://localhost:3001".to_string(),
            workspace: "development".to_string(),
            mode: ChatMode::Chat,
            models: ModelOverrides::default(),
            fork_repo: None,
            remote_url: None,
            branch: "main".to_string(),
            http_port: None,
            port_range: PortRange::default(),
            timeouts: StageTimeouts::default(),
            grace_timeout_ms: 5_000,
            probe: None,
            dataset_urls: DEFAULT_DATASET_URLS.iter().map(ToString::to_string).collect(),
            commit_message: format!("Add generated {language} service, tests and CI"),
            verify_assets: true,
            api_key: None,
            github_token: None,
        }
    }

    /// Reads the secrets from the environment.
    #[must_use]
    pub fn with_env_secrets(mut self) -> Self {
        self.api_key = non_empty_env(API_KEY_ENV);
        self.github_token = non_empty_env(GITHUB_TOKEN_ENV);
        self
    }

    /// Sets the generation service base URL and workspace.
    #[must_use]
    pub fn with_api(mut self, api_base: impl Into<String>, workspace: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self.workspace = workspace.into();
        self
    }

    /// Sets the chat mode.
    #[must_use]
    pub const fn with_mode(mut self, mode: ChatMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the model overrides.
    #[must_use]
    pub fn with_models(mut self, models: ModelOverrides) -> Self {
        self.models = models;
        self
    }

    /// Sets the fork source.
    #[must_use]
    pub fn with_fork_repo(mut self, repo: impl Into<String>) -> Self {
        self.fork_repo = Some(repo.into());
        self
    }

    /// Sets the push remote.
    #[must_use]
    pub fn with_remote_url(mut self, url: impl Into<String>) -> Self {
        self.remote_url = Some(url.into());
        self
    }

    /// Sets the preferred service port.
    #[must_use]
    pub const fn with_http_port(mut self, port: u16) -> Self {
        self.http_port = Some(port);
        self
    }

    /// Sets the port scan range.
    #[must_use]
    pub const fn with_port_range(mut self, range: PortRange) -> Self {
        self.port_range = range;
        self
    }

    /// Sets the stage timeouts.
    #[must_use]
    pub const fn with_timeouts(mut self, timeouts: StageTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Sets the stop grace period.
    #[must_use]
    pub fn with_grace_timeout(mut self, grace: Duration) -> Self {
        self.grace_timeout_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Overrides the readiness policy.
    #[must_use]
    pub fn with_probe_policy(mut self, policy: ProbePolicy) -> Self {
        self.probe = Some(policy);
        self
    }

    /// Sets the dataset mirrors.
    #[must_use]
    pub fn with_dataset_urls<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dataset_urls = urls.into_iter().map(Into::into).collect();
        self
    }

    /// Enables or disables served-asset verification.
    #[must_use]
    pub const fn with_asset_verification(mut self, enabled: bool) -> Self {
        self.verify_assets = enabled;
        self
    }

    /// Stop grace period.
    #[must_use]
    pub const fn grace_timeout(&self) -> Duration {
        Duration::from_millis(self.grace_timeout_ms)
    }

    /// Effective readiness policy.
    #[must_use]
    pub fn probe_policy(&self) -> ProbePolicy {
        self.probe
            .clone()
            .unwrap_or_else(|| ProbePolicy::for_language(self.language))
    }

    /// Directory holding run reports and logs.
    #[must_use]
    pub fn state_dir(&self) -> PathBuf {
        self.working_dir.join(crate::STATE_DIR)
    }

    /// Checks the configuration for values that cannot work.
    pub fn validate(&self) -> Result<(), ForgeflowError> {
        if self.port_range.lo == 0 || self.port_range.lo > self.port_range.hi {
            return Err(ForgeflowError::Config(format!(
                "empty port range {}",
                self.port_range
            )));
        }
        if self.http_port == Some(0) {
            return Err(ForgeflowError::Config(
                "http port must be within 1-65535".to_string(),
            ));
        }
        if self.probe_policy().max_attempts == 0 {
            return Err(ForgeflowError::Config(
                "readiness probe needs at least one attempt".to_string(),
            ));
        }
        if self.branch.trim().is_empty() {
            return Err(ForgeflowError::Config("branch must not be empty".to_string()));
        }
        if let Some(repo) = &self.fork_repo {
            if repo.split('/').filter(|p| !p.is_empty()).count() != 2 {
                return Err(ForgeflowError::Config(format!(
                    "fork repository '{repo}' must be owner/repo"
                )));
            }
        }
        Ok(())
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WorkflowConfig::new(Language::Python, "/tmp/work");
        assert_eq!(config.branch, "main");
        assert_eq!(config.port_range.to_string(), "8081-8180");
        assert_eq!(config.grace_timeout(), Duration::from_secs(5));
        assert_eq!(config.dataset_urls.len(), 2);
        assert_eq!(config.probe_policy(), ProbePolicy::for_language(Language::Python));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_stage_timeouts() {
        let timeouts = StageTimeouts::default();
        assert_eq!(timeouts.for_stage(StageKind::Serve), Duration::from_secs(30));
        assert_eq!(
            StageTimeouts::uniform(Duration::from_millis(10)).for_stage(StageKind::Test),
            Duration::from_secs(1)
        );
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let config = WorkflowConfig::new(Language::Julia, ".")
            .with_probe_policy(ProbePolicy::fixed(Duration::from_secs(1), 0));
        assert!(matches!(config.validate(), Err(ForgeflowError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_port_zero() {
        let config = WorkflowConfig::new(Language::Html, ".").with_http_port(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_fork_source() {
        let config = WorkflowConfig::new(Language::Html, ".").with_fork_repo("just-a-name");
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("owner/repo"));
    }

    #[test]
    fn test_secrets_not_serialized() {
        let mut config = WorkflowConfig::new(Language::Python, ".");
        config.api_key = Some("secret".to_string());
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("secret"));
    }

    #[test]
    fn test_dataset_mirrors_replace_defaults() {
        let config = WorkflowConfig::new(Language::Python, ".")
            .with_dataset_urls(["http://mirror.local/iris.csv"]);
        assert_eq!(config.dataset_urls, vec!["http://mirror.local/iris.csv".to_string()]);
    }

    #[test]
    fn test_chat_mode_parse() {
        assert_eq!("Agent".parse::<ChatMode>().unwrap(), ChatMode::Agent);
        assert!("batch".parse::<ChatMode>().is_err());
    }
}

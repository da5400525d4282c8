//! Error types for the forgeflow orchestrator.
//!
//! Every failure a stage can produce maps onto one variant of
//! [`ForgeflowError`]. The stage runner converts these into a
//! [`StageResult`](crate::core::StageResult) using [`ForgeflowError::kind`]
//! as the stable cause code shown in the run report.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// The main error type for forgeflow operations.
#[derive(Debug, Error)]
pub enum ForgeflowError {
    /// A child process could not be launched.
    #[error("{0}")]
    Spawn(#[from] SpawnError),

    /// No free port was available in the configured range.
    #[error("{0}")]
    PortExhausted(#[from] PortExhaustedError),

    /// A started service never became reachable.
    #[error("{0}")]
    ReadinessTimeout(#[from] ReadinessTimeoutError),

    /// A test runner could not be invoked at all.
    #[error("{0}")]
    HarnessInvocation(#[from] HarnessInvocationError),

    /// Tests ran but did not pass.
    #[error("{0}")]
    TestFailure(#[from] TestFailureError),

    /// The generation collaborator failed.
    #[error("{0}")]
    Generation(#[from] GenerationError),

    /// A version-control operation failed.
    #[error("{0}")]
    Vcs(#[from] VcsError),

    /// The dataset could not be downloaded.
    #[error("{0}")]
    Dataset(#[from] DatasetError),

    /// A stage ran before the state it depends on was available.
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// The run was cancelled.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ForgeflowError {
    /// Returns a stable snake_case code identifying the error kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Spawn(_) => "spawn_error",
            Self::PortExhausted(_) => "port_exhausted",
            Self::ReadinessTimeout(_) => "readiness_timeout",
            Self::HarnessInvocation(_) => "harness_invocation_error",
            Self::TestFailure(e) if e.collection_error => "collection_error",
            Self::TestFailure(_) => "test_failure",
            Self::Generation(_) => "generation_error",
            Self::Vcs(_) => "vcs_error",
            Self::Dataset(_) => "dataset_error",
            Self::Precondition(_) => "precondition_failed",
            Self::Cancelled(_) => "cancelled",
            Self::Config(_) => "config_error",
            Self::Serialization(_) => "serialization_error",
            Self::Io(_) => "io_error",
        }
    }
}

impl From<serde_json::Error> for ForgeflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Error raised when a process cannot be launched.
#[derive(Debug, Clone, Error)]
#[error("Failed to spawn '{program}': {reason}")]
pub struct SpawnError {
    /// The program that was being launched.
    pub program: String,
    /// Why the launch failed.
    pub reason: String,
    /// Whether the executable itself was not found.
    pub not_found: bool,
}

impl SpawnError {
    /// Creates a new spawn error.
    #[must_use]
    pub fn new(program: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            reason: reason.into(),
            not_found: false,
        }
    }

    /// Builds a spawn error from an IO error returned by `spawn`.
    #[must_use]
    pub fn from_io(program: impl Into<String>, err: &std::io::Error) -> Self {
        Self {
            program: program.into(),
            reason: err.to_string(),
            not_found: err.kind() == std::io::ErrorKind::NotFound,
        }
    }
}

/// Error raised when every port in a range is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("No free port in range {lo}-{hi}")]
pub struct PortExhaustedError {
    /// Lower bound of the scanned range.
    pub lo: u16,
    /// Upper bound of the scanned range (inclusive).
    pub hi: u16,
}

/// Error raised when a service never answers its readiness probe.
#[derive(Debug, Clone, Error)]
pub struct ReadinessTimeoutError {
    /// The probed URL.
    pub url: String,
    /// Number of probe attempts made.
    pub attempts: u32,
    /// Whether the service process exited while being probed.
    pub service_exited: bool,
}

impl fmt::Display for ReadinessTimeoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Service at {} not ready after {} attempts",
            self.url, self.attempts
        )?;
        if self.service_exited {
            write!(f, " (process exited)")?;
        }
        Ok(())
    }
}

/// Error raised when a test runner cannot be started.
#[derive(Debug, Clone, Error)]
#[error("Test runner '{runner}' could not run: {reason}")]
pub struct HarnessInvocationError {
    /// The runner that was invoked (e.g. `pytest`).
    pub runner: String,
    /// Why the invocation failed.
    pub reason: String,
}

impl HarnessInvocationError {
    /// Creates a new harness invocation error.
    #[must_use]
    pub fn new(runner: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            runner: runner.into(),
            reason: reason.into(),
        }
    }
}

impl From<SpawnError> for HarnessInvocationError {
    fn from(err: SpawnError) -> Self {
        Self::new(err.program, err.reason)
    }
}

/// Error raised when tests ran to completion but did not pass.
#[derive(Debug, Clone, Error)]
pub struct TestFailureError {
    /// Passed case count.
    pub passed: u32,
    /// Failed case count.
    pub failed: u32,
    /// Errored case count.
    pub errored: u32,
    /// The tests could not be collected (broken import, syntax error).
    pub collection_error: bool,
    /// Runner exit code.
    pub exit_code: Option<i32>,
}

impl fmt::Display for TestFailureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.collection_error {
            return write!(f, "Test collection failed (generated tests could not be loaded)");
        }
        write!(
            f,
            "Tests failed: {} passed, {} failed, {} errored (exit code {})",
            self.passed,
            self.failed,
            self.errored,
            self.exit_code.map_or_else(|| "none".to_string(), |c| c.to_string())
        )
    }
}

/// Error raised by the generation collaborator.
#[derive(Debug, Clone, Error)]
#[error("Generation failed: {message}")]
pub struct GenerationError {
    /// Description of the failure.
    pub message: String,
    /// HTTP status returned by the service, if any.
    pub status: Option<u16>,
}

impl GenerationError {
    /// Creates a new generation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
        }
    }

    /// Sets the HTTP status.
    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }
}

impl From<reqwest::Error> for GenerationError {
    fn from(err: reqwest::Error) -> Self {
        let status = err.status().map(|s| s.as_u16());
        Self {
            message: err.to_string(),
            status,
        }
    }
}

/// The version-control operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VcsOperation {
    /// Repository initialization or branch setup.
    Init,
    /// Configuring the remote.
    Remote,
    /// Forking on the hosting service.
    Fork,
    /// Cloning a repository.
    Clone,
    /// Staging and committing.
    Commit,
    /// Pushing to a remote.
    Push,
}

impl fmt::Display for VcsOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => write!(f, "init"),
            Self::Remote => write!(f, "remote"),
            Self::Fork => write!(f, "fork"),
            Self::Clone => write!(f, "clone"),
            Self::Commit => write!(f, "commit"),
            Self::Push => write!(f, "push"),
        }
    }
}

/// Error raised by the VCS collaborator.
#[derive(Debug, Clone, Error)]
#[error("VCS {operation} failed: {message}")]
pub struct VcsError {
    /// The operation that failed.
    pub operation: VcsOperation,
    /// The collaborator's detail.
    pub message: String,
}

impl VcsError {
    /// Creates a new VCS error.
    #[must_use]
    pub fn new(operation: VcsOperation, message: impl Into<String>) -> Self {
        Self {
            operation,
            message: message.into(),
        }
    }
}

/// Error raised when no dataset URL could be downloaded.
#[derive(Debug, Clone, Error)]
#[error("Dataset download failed: {message}")]
pub struct DatasetError {
    /// Description of the last failure.
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds_are_stable() {
        let err: ForgeflowError = PortExhaustedError { lo: 8000, hi: 8001 }.into();
        assert_eq!(err.kind(), "port_exhausted");

        let err: ForgeflowError = SpawnError::new("julia", "not found").into();
        assert_eq!(err.kind(), "spawn_error");

        let err: ForgeflowError = VcsError::new(VcsOperation::Push, "rejected").into();
        assert_eq!(err.kind(), "vcs_error");
    }

    #[test]
    fn test_collection_error_has_distinct_kind() {
        let collection: ForgeflowError = TestFailureError {
            passed: 0,
            failed: 0,
            errored: 0,
            collection_error: true,
            exit_code: Some(2),
        }
        .into();
        let assertion: ForgeflowError = TestFailureError {
            passed: 3,
            failed: 1,
            errored: 0,
            collection_error: false,
            exit_code: Some(1),
        }
        .into();

        assert_eq!(collection.kind(), "collection_error");
        assert_eq!(assertion.kind(), "test_failure");
        assert!(assertion.to_string().contains("1 failed"));
    }

    #[test]
    fn test_readiness_timeout_message() {
        let err = ReadinessTimeoutError {
            url: "http://127.0.0.1:8081/hello".to_string(),
            attempts: 3,
            service_exited: true,
        };
        let msg = err.to_string();
        assert!(msg.contains("3 attempts"));
        assert!(msg.contains("process exited"));
    }

    #[test]
    fn test_spawn_error_not_found() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "No such file");
        let err = SpawnError::from_io("pytest", &io);
        assert!(err.not_found);

        let harness: HarnessInvocationError = err.into();
        assert_eq!(harness.runner, "pytest");
    }

    #[test]
    fn test_vcs_operation_display() {
        assert_eq!(VcsOperation::Clone.to_string(), "clone");
        assert_eq!(
            VcsError::new(VcsOperation::Fork, "no token").to_string(),
            "VCS fork failed: no token"
        );
    }
}

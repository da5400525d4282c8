//! Stage status, kind, policy and run outcome enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The stages a workflow run can contain, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Prepare the workspace repository and download the dataset.
    Fetch,
    /// Generate service code, tests and manifests.
    Generate,
    /// One-time dependency installation and precompilation.
    Setup,
    /// Start the service under supervision.
    Serve,
    /// Wait for the service to answer requests.
    Probe,
    /// Run the language's test harness.
    Test,
    /// Generate the README.
    Document,
    /// Write the CI workflow file.
    Ci,
    /// Commit and push the artifacts.
    Publish,
}

impl StageKind {
    /// Every stage kind in pipeline order.
    pub const ALL: [Self; 9] = [
        Self::Fetch,
        Self::Generate,
        Self::Setup,
        Self::Serve,
        Self::Probe,
        Self::Test,
        Self::Document,
        Self::Ci,
        Self::Publish,
    ];

    /// Returns the stage name used in logs and reports.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::Generate => "generate",
            Self::Setup => "setup",
            Self::Serve => "serve",
            Self::Probe => "probe",
            Self::Test => "test",
            Self::Document => "document",
            Self::Ci => "ci",
            Self::Publish => "publish",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a stage failure halts the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StagePolicy {
    /// Failure halts all subsequent stages.
    #[default]
    Required,
    /// Failure is recorded and the pipeline continues.
    BestEffort,
}

impl fmt::Display for StagePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Required => write!(f, "required"),
            Self::BestEffort => write!(f, "best-effort"),
        }
    }
}

/// Where a stage is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageStatus {
    /// Stage has not started.
    #[default]
    Pending,
    /// Executing under the runner.
    Running,
    /// Finished without error.
    Ok,
    /// Stage failed.
    Failed,
    /// Stage did not run or had nothing to do.
    Skipped,
    /// Stage exceeded its timeout.
    TimedOut,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Ok => write!(f, "ok"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
            Self::TimedOut => write!(f, "timed-out"),
        }
    }
}

impl StageStatus {
    /// Ok, failed, skipped or timed out.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ok | Self::Failed | Self::Skipped | Self::TimedOut)
    }

    /// Ok or skipped; neither halts the run.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Ok | Self::Skipped)
    }

    /// Failed or timed out.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::TimedOut)
    }

    /// Returns true if `next` is a legal transition from this status.
    ///
    /// `pending → running → {ok, failed, skipped, timed-out}`; a pending
    /// stage may also be skipped without running.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        match self {
            Self::Pending => matches!(next, Self::Running | Self::Skipped),
            Self::Running => next.is_terminal(),
            _ => false,
        }
    }
}

/// Overall outcome of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every stage succeeded.
    Success,
    /// All required stages succeeded but a best-effort stage failed.
    Partial,
    /// A required stage failed or timed out.
    Failed,
}

impl RunOutcome {
    /// Derives the outcome from stage policies and statuses.
    #[must_use]
    pub fn from_statuses<I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = (StagePolicy, StageStatus)>,
    {
        let mut outcome = Self::Success;
        for (policy, status) in statuses {
            if !status.is_failure() {
                continue;
            }
            match policy {
                StagePolicy::Required => return Self::Failed,
                StagePolicy::BestEffort => outcome = Self::Partial,
            }
        }
        outcome
    }

    /// Process exit code for this outcome.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Success | Self::Partial => 0,
            Self::Failed => 1,
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Partial => write!(f, "partial"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_status_display() {
        assert_eq!(StageStatus::Ok.to_string(), "ok");
        assert_eq!(StageStatus::Failed.to_string(), "failed");
        assert_eq!(StageStatus::TimedOut.to_string(), "timed-out");
    }

    #[test]
    fn test_stage_status_serialize() {
        let json = serde_json::to_string(&StageStatus::TimedOut).unwrap();
        assert_eq!(json, r#""timed-out""#);

        let deserialized: StageStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, StageStatus::TimedOut);
    }

    #[test]
    fn test_stage_status_transitions() {
        assert!(StageStatus::Pending.can_transition_to(StageStatus::Running));
        assert!(StageStatus::Pending.can_transition_to(StageStatus::Skipped));
        assert!(!StageStatus::Pending.can_transition_to(StageStatus::Ok));
        assert!(StageStatus::Running.can_transition_to(StageStatus::TimedOut));
        assert!(!StageStatus::Ok.can_transition_to(StageStatus::Failed));
    }

    #[test]
    fn test_timed_out_is_failure() {
        assert!(StageStatus::TimedOut.is_failure());
        assert!(StageStatus::Skipped.is_success());
        assert!(!StageStatus::Running.is_terminal());
    }

    #[test]
    fn test_outcome_from_statuses() {
        use StagePolicy::{BestEffort, Required};

        let all_ok = [(Required, StageStatus::Ok), (BestEffort, StageStatus::Ok)];
        assert_eq!(RunOutcome::from_statuses(all_ok), RunOutcome::Success);

        let doc_failed = [(Required, StageStatus::Ok), (BestEffort, StageStatus::Failed)];
        assert_eq!(RunOutcome::from_statuses(doc_failed), RunOutcome::Partial);

        let probe_timed_out = [
            (BestEffort, StageStatus::Failed),
            (Required, StageStatus::TimedOut),
        ];
        assert_eq!(RunOutcome::from_statuses(probe_timed_out), RunOutcome::Failed);
    }

    #[test]
    fn test_outcome_exit_codes() {
        assert_eq!(RunOutcome::Success.exit_code(), 0);
        assert_eq!(RunOutcome::Partial.exit_code(), 0);
        assert_eq!(RunOutcome::Failed.exit_code(), 1);
    }

    #[test]
    fn test_stage_kind_order() {
        assert_eq!(StageKind::ALL.first(), Some(&StageKind::Fetch));
        assert_eq!(StageKind::ALL.last(), Some(&StageKind::Publish));
        assert!(StageKind::Serve < StageKind::Test);
        assert_eq!(StageKind::Ci.to_string(), "ci");
    }
}

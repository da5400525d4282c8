//! Per-stage result records kept in the run report.

use super::{StageArtifact, StageKind, StageOutput, StagePolicy, StageStatus};
use crate::errors::ForgeflowError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Concise failure cause shown in the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Stable error code, see [`ForgeflowError::kind`].
    pub kind: String,
    /// Human-readable message.
    pub message: String,
}

impl From<&ForgeflowError> for ErrorDetail {
    fn from(err: &ForgeflowError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

/// The recorded result of one stage. Append-only in the run report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    /// Which stage.
    pub stage: StageKind,
    /// Required or best-effort.
    pub policy: StagePolicy,
    /// Terminal status.
    pub status: StageStatus,
    /// When the stage started (or was skipped).
    pub started_at: DateTime<Utc>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
    /// Captured output reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_ref: Option<PathBuf>,
    /// Failure cause, if the stage failed or timed out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
    /// Skip reason, if skipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    /// Stage data.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, serde_json::Value>,
    /// Artifacts written by the stage.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<StageArtifact>,
    /// Non-fatal warnings.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// Set when the stage never ran because the run stopped early. A halted
    /// required stage counts as failed in the run outcome.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub halted: bool,
}

impl StageResult {
    fn base(stage: StageKind, policy: StagePolicy, status: StageStatus) -> Self {
        Self {
            stage,
            policy,
            status,
            started_at: Utc::now(),
            duration_ms: 0,
            output_ref: None,
            error: None,
            skip_reason: None,
            data: BTreeMap::new(),
            artifacts: Vec::new(),
            warnings: Vec::new(),
            halted: false,
        }
    }

    /// Builds a result from a stage's successful output.
    #[must_use]
    pub fn from_output(
        stage: StageKind,
        policy: StagePolicy,
        started_at: DateTime<Utc>,
        elapsed: Duration,
        output: StageOutput,
    ) -> Self {
        Self {
            started_at,
            duration_ms: duration_ms(elapsed),
            output_ref: output.output_ref,
            skip_reason: output.skip_reason,
            data: output.data,
            artifacts: output.artifacts,
            warnings: output.warnings,
            ..Self::base(stage, policy, output.status)
        }
    }

    /// Builds a failed (or timed-out) result.
    #[must_use]
    pub fn failed(
        stage: StageKind,
        policy: StagePolicy,
        status: StageStatus,
        started_at: DateTime<Utc>,
        elapsed: Duration,
        error: ErrorDetail,
    ) -> Self {
        Self {
            started_at,
            duration_ms: duration_ms(elapsed),
            error: Some(error),
            ..Self::base(stage, policy, status)
        }
    }

    /// Builds a result for a stage that never ran.
    #[must_use]
    pub fn not_run(stage: StageKind, policy: StagePolicy, reason: impl Into<String>) -> Self {
        Self {
            skip_reason: Some(reason.into()),
            ..Self::base(stage, policy, StageStatus::Skipped)
        }
    }

    /// Builds a result for a stage cut off by cancellation or by an earlier
    /// required failure.
    #[must_use]
    pub fn halted(stage: StageKind, policy: StagePolicy, reason: impl Into<String>) -> Self {
        Self {
            halted: true,
            ..Self::not_run(stage, policy, reason)
        }
    }

    /// Status as seen by the run outcome: a halted stage reads as failed.
    #[must_use]
    pub fn outcome_status(&self) -> StageStatus {
        if self.halted {
            StageStatus::Failed
        } else {
            self.status
        }
    }

    /// Sets the captured output reference.
    #[must_use]
    pub fn with_output_ref(mut self, path: Option<PathBuf>) -> Self {
        if path.is_some() {
            self.output_ref = path;
        }
        self
    }

    /// One-line cause for the human-readable log.
    #[must_use]
    pub fn cause(&self) -> Option<String> {
        match (&self.error, &self.skip_reason) {
            (Some(err), _) => Some(format!("{}: {}", err.kind, err.message)),
            (None, Some(reason)) => Some(reason.clone()),
            (None, None) => None,
        }
    }
}

fn duration_ms(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

//! Stage output type with factory methods.

use super::StageStatus;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// A file written by a stage, with its content digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageArtifact {
    /// Path relative to the working directory.
    pub path: PathBuf,
    /// Hex-encoded SHA-256 of the content.
    pub sha256: String,
    /// Content length in bytes.
    pub bytes: u64,
}

impl StageArtifact {
    /// Describes `content` as written to `path`.
    #[must_use]
    pub fn from_content(path: impl Into<PathBuf>, content: &[u8]) -> Self {
        let digest = Sha256::digest(content);
        Self {
            path: path.into(),
            sha256: hex::encode(digest),
            bytes: content.len() as u64,
        }
    }
}

/// The output of a successful (or skipped) stage execution.
///
/// Failures are not represented here: stages return `Err` and the runner
/// converts the error into a [`StageResult`](super::StageResult).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageOutput {
    /// Either [`StageStatus::Ok`] or [`StageStatus::Skipped`].
    pub status: StageStatus,

    /// Structured data for the report and later stages.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, serde_json::Value>,

    /// Files produced by the stage.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<StageArtifact>,

    /// Non-fatal problems encountered along the way.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,

    /// Path to captured runner/service output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_ref: Option<PathBuf>,

    /// Skip reason (for skipped executions).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
}

impl Default for StageOutput {
    fn default() -> Self {
        Self::ok()
    }
}

impl StageOutput {
    /// Creates an empty successful output.
    #[must_use]
    pub fn ok() -> Self {
        Self {
            status: StageStatus::Ok,
            data: BTreeMap::new(),
            artifacts: Vec::new(),
            warnings: Vec::new(),
            output_ref: None,
            skip_reason: None,
        }
    }

    /// Creates a skip output with a reason.
    #[must_use]
    pub fn skip(reason: impl Into<String>) -> Self {
        Self {
            status: StageStatus::Skipped,
            skip_reason: Some(reason.into()),
            ..Self::ok()
        }
    }

    /// Adds a data entry.
    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Adds an artifact.
    #[must_use]
    pub fn with_artifact(mut self, artifact: StageArtifact) -> Self {
        self.artifacts.push(artifact);
        self
    }

    /// Adds a warning.
    #[must_use]
    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    /// Sets the captured output reference.
    #[must_use]
    pub fn with_output_ref(mut self, path: impl AsRef<Path>) -> Self {
        self.output_ref = Some(path.as_ref().to_path_buf());
        self
    }

    /// Gets a data value by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.data.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_artifact_digest() {
        let artifact = StageArtifact::from_content("app.py", b"abc");
        assert_eq!(
            artifact.sha256,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(artifact.bytes, 3);
    }

    #[test]
    fn test_skip_output() {
        let output = StageOutput::skip("no service to test");
        assert_eq!(output.status, StageStatus::Skipped);
        assert_eq!(output.skip_reason.as_deref(), Some("no service to test"));
    }

    #[test]
    fn test_builder_methods() {
        let output = StageOutput::ok()
            .with_data("port", serde_json::json!(8081))
            .with_warning("dataset unavailable")
            .with_output_ref(".forgeflow/logs/test.log");

        assert_eq!(output.get("port"), Some(&serde_json::json!(8081)));
        assert_eq!(output.warnings.len(), 1);
        assert!(output.output_ref.is_some());
    }

    #[test]
    fn test_empty_fields_not_serialized() {
        let json = serde_json::to_value(StageOutput::ok()).unwrap();
        let obj = json.as_object().unwrap();
        assert!(!obj.contains_key("data"));
        assert!(!obj.contains_key("artifacts"));
        assert!(!obj.contains_key("skip_reason"));
    }
}

//! Stage trait and the stages of a run.
//!
//! A stage is one step of the build-test-publish cycle. Stages return a
//! [`StageOutput`] on success and a [`ForgeflowError`] on failure; the
//! [`StageRunner`] turns either into a [`StageResult`](crate::core::StageResult)
//! after releasing whatever the stage left behind.

mod ci;
mod context;
mod document;
mod fetch;
mod generate;
mod probe;
mod publish;
mod runner;
mod serve;
mod setup;

pub use ci::CiStage;
pub use context::{Collaborators, RunContext, ServiceEndpoint};
pub use document::DocumentStage;
pub use fetch::FetchStage;
pub use generate::GenerateStage;
pub use probe::ProbeStage;
pub use publish::PublishStage;
pub use runner::StageRunner;
pub use serve::ServeStage;
pub use setup::SetupStage;
pub use test::TestStage;

use crate::core::{StageArtifact, StageKind, StageOutput, StagePolicy};
use crate::errors::ForgeflowError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::path::Path;
use std::time::Duration;

/// One step of a run.
#[async_trait]
pub trait Stage: Send + Sync + Debug {
    /// Which step this is.
    fn kind(&self) -> StageKind;

    /// Executes the stage.
    ///
    /// # Errors
    ///
    /// Any error fails the stage; the runner records its
    /// [`kind`](ForgeflowError::kind) as the cause.
    async fn execute(&self, ctx: &RunContext) -> Result<StageOutput, ForgeflowError>;
}

/// A planned stage: what runs, whether it may fail, and for how long.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSpec {
    /// The stage.
    pub stage: StageKind,
    /// Required or best-effort.
    pub policy: StagePolicy,
    /// Upper bound on the stage's execution.
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
}

impl StageSpec {
    /// A required stage.
    #[must_use]
    pub const fn required(stage: StageKind, timeout: Duration) -> Self {
        Self {
            stage,
            policy: StagePolicy::Required,
            timeout,
        }
    }

    /// A best-effort stage.
    #[must_use]
    pub const fn best_effort(stage: StageKind, timeout: Duration) -> Self {
        Self {
            stage,
            policy: StagePolicy::BestEffort,
            timeout,
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

/// Writes `content` to `relative` under the working directory and returns
/// its digest record.
pub(crate) fn write_artifact(
    root: &Path,
    relative: &Path,
    content: &str,
) -> Result<StageArtifact, ForgeflowError> {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, content)?;
    tracing::debug!(path = %path.display(), bytes = content.len(), "Artifact written");
    Ok(StageArtifact::from_content(relative, content.as_bytes()))
}

//! Core types for forgeflow.
//!
//! This module contains the fundamental types used throughout the
//! orchestrator: stage kinds and statuses, the language targets, stage
//! outputs and the per-stage result records.

mod language;
mod output;
mod result;
mod status;

pub use language::Language;
pub use output::{StageArtifact, StageOutput};
pub use result::{ErrorDetail, StageResult};
pub use status::{RunOutcome, StageKind, StagePolicy, StageStatus};

//! Testing utilities for forgeflow runs.
//!
//! This module provides:
//! - Scripted command runners and probers
//! - Fake collaborators (generator, VCS, dataset, harness)
//! - Stub stages with configurable behavior
//! - Run context fixtures

mod fakes;
mod fixtures;
mod mocks;

pub use fakes::{FakeHarness, RecordingVcs, StaticDataset, StaticGenerator};
pub use fixtures::{context, context_with_events, stub_collaborators, AlwaysFreeProbe};
pub use mocks::{ScriptedCommandRunner, ScriptedProber, StubBehavior, StubStage};

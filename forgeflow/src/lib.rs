//! # Forgeflow
//!
//! Build-test-publish orchestration for small generated web services.
//!
//! A run takes one language target (static HTML, Python or Julia) through a
//! fixed plan of stages:
//!
//! - **fetch**: prepare the repository and download the dataset
//! - **generate**: service code, tests and dependency manifest
//! - **setup**: one-time dependency installation (HTML and Julia)
//! - **serve** and **probe**: start the service on a leased port and wait for it
//! - **test**: run the ecosystem's test runner against the live service
//! - **document**, **ci** and **publish**: README, CI workflow, commit and push
//!
//! Every started service is supervised and stopped when the run ends,
//! whichever way it ends.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use forgeflow::prelude::*;
//!
//! let config = WorkflowConfig::new(Language::Python, "./site").with_env_secrets();
//! let generator = AnythingLlmClient::connect(&config).await?;
//! let report = WorkflowOrchestrator::builder(config)
//!     .with_generator(Arc::new(generator))
//!     .build()?
//!     .run()
//!     .await;
//! std::process::exit(i32::from(report.exit_code()));
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod cli;
pub mod collaborators;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod harness;
pub mod orchestrator;
pub mod ports;
pub mod process;
pub mod readiness;
pub mod stages;
pub mod templates;
pub mod testing;


/// README written by the document stage.
pub const README_FILE: &str = "README.md";

/// CI workflow written by the ci stage.
pub const CI_WORKFLOW_FILE: &str = ".github/workflows/ci.yml";

/// Dataset downloaded by the fetch stage.
pub const DATASET_FILE: &str = "data.csv";

/// Directory under the working directory holding reports and logs.
pub const STATE_DIR: &str = ".forgeflow";

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::collaborators::{AnythingLlmClient, CodeGenerator, GitCli, VcsClient};
    pub use crate::config::{ChatMode, ModelOverrides, StageTimeouts, WorkflowConfig};
    pub use crate::core::{
        Language, RunOutcome, StageKind, StageOutput, StagePolicy, StageResult, StageStatus,
    };
    pub use crate::errors::ForgeflowError;
    pub use crate::events::{LoggingEventSink, NoOpEventSink, RunEventSink};
    pub use crate::orchestrator::{WorkflowOrchestrator, WorkflowRun};
    pub use crate::ports::{PortAllocator, PortRange};
    pub use crate::readiness::ProbePolicy;
    pub use crate::stages::{RunContext, Stage, StageSpec};
    pub use std::sync::Arc;
}

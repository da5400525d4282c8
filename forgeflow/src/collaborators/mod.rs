//! External collaborators: code generation, version control and dataset
//! download.
//!
//! Stages only see the traits defined here; the live clients are swapped for
//! fakes in tests.

mod anythingllm;
mod dataset;
mod generation;
mod git;
mod vcs;

pub use anythingllm::{AnythingLlmClient, WorkspaceInfo};
pub use dataset::{DatasetDownload, DatasetSource, HttpDatasetSource};
pub use generation::{clean_code_output, clean_markdown, CodeGenerator, GeneratedText, GenerationRequest};
pub use git::GitCli;
pub use vcs::{RepoRef, VcsClient};

#[cfg(test)]
pub use generation::MockCodeGenerator;
#[cfg(test)]
pub use vcs::MockVcsClient;

//! Prompt and file templates.

mod ci;
mod prompts;

pub use ci::{ci_workflow, package_json, REQUIREMENTS_TXT};
pub use prompts::{code_prompt, doc_prompt, test_prompt};

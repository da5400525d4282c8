//! Code generation collaborator contract and response cleaning.

use crate::errors::GenerationError;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// A prompt for the generation service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Prompt text.
    pub prompt: String,
    /// Language tag of the expected output (`python`, `javascript`, ...).
    pub language: String,
    /// Model to use instead of the workspace default.
    pub model: Option<String>,
}

impl GenerationRequest {
    /// Creates a request with no model override.
    #[must_use]
    pub fn new(prompt: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            language: language.into(),
            model: None,
        }
    }

    /// Sets the model override.
    #[must_use]
    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }
}

/// Raw text returned by the generation service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedText {
    /// Response text, before cleaning.
    pub text: String,
    /// Model that produced the text, or `unknown`.
    pub model: String,
}

/// Produces source text from a prompt. Any error is fatal for the caller.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CodeGenerator: Send + Sync {
    /// Sends `request` and returns the service's text.
    async fn generate(&self, request: GenerationRequest) -> Result<GeneratedText, GenerationError>;
}

fn fenced_block() -> Option<&'static Regex> {
    static FENCED: OnceLock<Option<Regex>> = OnceLock::new();
    FENCED
        .get_or_init(|| Regex::new(r"```[A-Za-z0-9_+-]*\n([\s\S]*?)\n```").ok())
        .as_ref()
}

fn dangling_fence() -> Option<&'static Regex> {
    static DANGLING: OnceLock<Option<Regex>> = OnceLock::new();
    DANGLING.get_or_init(|| Regex::new(r"```[\s\S]*").ok()).as_ref()
}

const CHATTER_PREFIXES: [&str; 6] = ["example", "note", "output", "certainly", "below", "here"];
const MARKDOWN_PREFIXES: [&str; 4] = ["# ", "##", "*", "-"];

/// Strips markdown fences and conversational lines from generated code.
///
/// Fenced blocks keep their contents; a fence left unclosed drops everything
/// after it. Blank lines, top-level markdown bullets and headings, and lines
/// opening with chatter ("Here is...", "Note:") are removed.
#[must_use]
pub fn clean_code_output(text: &str) -> String {
    let mut code = text.replace("\r\n", "\n");
    if let Some(re) = fenced_block() {
        code = re.replace_all(&code, "$1").into_owned();
    }
    if let Some(re) = dangling_fence() {
        code = re.replace_all(&code, "").into_owned();
    }

    code.lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .filter(|line| !MARKDOWN_PREFIXES.iter().any(|p| line.starts_with(p)))
        .filter(|line| {
            let lower = line.to_ascii_lowercase();
            !CHATTER_PREFIXES.iter().any(|p| lower.starts_with(p))
        })
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Unwraps a markdown document the service wrapped in a single fence.
#[must_use]
pub fn clean_markdown(text: &str) -> String {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.strip_suffix("```").unwrap_or(body).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_fenced_code_is_unwrapped() {
        let raw = "Here is the app:\n```python\nfrom flask import Flask\napp = Flask(__name__)\n```\nNote: run with python3.";
        assert_eq!(
            clean_code_output(raw),
            "from flask import Flask\napp = Flask(__name__)"
        );
    }

    #[test]
    fn test_chatter_and_blank_lines_removed() {
        let raw = "Certainly! Below is the code.\n\nusing Genie\n\n  route(\"/hello\") do\nend\n";
        assert_eq!(
            clean_code_output(raw),
            "using Genie\n  route(\"/hello\") do\nend"
        );
    }

    #[test]
    fn test_unclosed_fence_drops_tail() {
        let raw = "const x = 1;\n```\nexplanation that never ends";
        assert_eq!(clean_code_output(raw), "const x = 1;");
    }

    #[test]
    fn test_indented_comment_lines_survive() {
        let raw = "def f():\n    # keep me\n    return 1";
        assert_eq!(clean_code_output(raw), raw);
    }

    #[test]
    fn test_chatter_only_response_is_empty() {
        assert!(clean_code_output("Here you go!\n```\n```").is_empty());
    }

    #[test]
    fn test_markdown_fence_removed() {
        let raw = "```markdown\n# Flask API\n\n## Running\n```";
        assert_eq!(clean_markdown(raw), "# Flask API\n\n## Running");
        assert_eq!(clean_markdown("# Plain"), "# Plain");
    }

    #[tokio::test]
    async fn test_mock_generator() {
        let mut generator = MockCodeGenerator::new();
        generator
            .expect_generate()
            .withf(|req| req.language == "julia" && req.model.as_deref() == Some("qwen"))
            .times(1)
            .returning(|_| {
                Ok(GeneratedText {
                    text: "using Test".to_string(),
                    model: "qwen".to_string(),
                })
            });

        let out = generator
            .generate(GenerationRequest::new("tests", "julia").with_model(Some("qwen".into())))
            .await
            .unwrap();
        assert_eq!(out.model, "qwen");
    }
}

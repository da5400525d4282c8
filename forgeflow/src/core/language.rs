//! Language targets and their conventional artifact layout.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// A target ecosystem for generated code.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    /// Static page with JS, tested with Jest.
    Html,
    /// Flask service, tested with pytest.
    Python,
    /// Genie service, tested with `Test.jl`.
    Julia,
}

impl Language {
    /// Every supported target.
    pub const ALL: [Self; 3] = [Self::Html, Self::Python, Self::Julia];

    /// Returns the CLI name of the target.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Html => "html",
            Self::Python => "python",
            Self::Julia => "julia",
        }
    }

    /// The language tag used for generated test sources.
    ///
    /// Browser tests are JavaScript even though the artifact is HTML.
    #[must_use]
    pub const fn test_source_language(&self) -> &'static str {
        match self {
            Self::Html => "javascript",
            Self::Python => "python",
            Self::Julia => "julia",
        }
    }

    /// Service entry file, relative to the working directory.
    #[must_use]
    pub const fn entry_file(&self) -> &'static str {
        match self {
            Self::Html => "index.html",
            Self::Python => "app.py",
            Self::Julia => "app.jl",
        }
    }

    /// Test directory, relative to the working directory.
    #[must_use]
    pub fn test_dir(&self) -> PathBuf {
        Path::new("tests").join(self.as_str())
    }

    /// Generated test file, relative to the working directory.
    #[must_use]
    pub fn test_file(&self) -> PathBuf {
        let name = match self {
            Self::Html => "test_index.test.js",
            Self::Python => "test_app.py",
            Self::Julia => "test_app.jl",
        };
        self.test_dir().join(name)
    }

    /// Dependency manifest, relative to the working directory.
    #[must_use]
    pub const fn deps_file(&self) -> &'static str {
        match self {
            Self::Html => "package.json",
            Self::Python => "requirements.txt",
            Self::Julia => "Project.toml",
        }
    }

    /// Whether the target serves the tabular dataset.
    #[must_use]
    pub const fn needs_dataset(&self) -> bool {
        matches!(self, Self::Html | Self::Python)
    }

    /// Path the service answers on once it is up.
    #[must_use]
    pub const fn health_path(&self) -> &'static str {
        match self {
            Self::Html => "/",
            Self::Python | Self::Julia => "/hello",
        }
    }

    /// Files the publish stage commits, relative to the working directory.
    #[must_use]
    pub fn publishable_files(&self) -> Vec<PathBuf> {
        let mut files = vec![
            PathBuf::from(self.entry_file()),
            self.test_file(),
            PathBuf::from(self.deps_file()),
            PathBuf::from(crate::README_FILE),
            PathBuf::from(crate::CI_WORKFLOW_FILE),
        ];
        if matches!(self, Self::Python) {
            files.push(self.test_dir().join("__init__.py"));
        }
        if self.needs_dataset() {
            files.push(PathBuf::from(crate::DATASET_FILE));
        }
        files
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "html" => Ok(Self::Html),
            "python" => Ok(Self::Python),
            "julia" => Ok(Self::Julia),
            other => Err(format!(
                "unknown language '{other}' (expected html, python or julia)"
            )),
        }
    }
}

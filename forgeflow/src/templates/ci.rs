//! Templated manifests and CI workflows.

use crate::core::Language;

/// Python dependencies of the generated service and its tests.
pub const REQUIREMENTS_TXT: &str = "flask\npandas\npytest\n";

/// `package.json` running Jest in jsdom against `tests/html`.
#[must_use]
pub fn package_json() -> String {
    let manifest = serde_json::json!({
        "name": "forgeflow-html-app",
        "version": "1.0.0",
        "private": true,
        "scripts": {
            "test": "jest --testPathPattern=tests/html"
        },
        "devDependencies": {
            "jest": "^29.7.0",
            "jest-environment-jsdom": "^29.7.0"
        },
        "jest": {
            "testMatch": ["**/tests/html/*.test.js"],
            "testEnvironment": "jsdom"
        }
    });
    serde_json::to_string_pretty(&manifest).map_or_else(|_| String::new(), |s| s + "\n")
}

/// GitHub Actions workflow testing `language` on pushes and pull requests
/// to `branch`.
#[must_use]
pub fn ci_workflow(language: Language, branch: &str) -> String {
    let steps = match language {
        Language::Html => {
            "      - uses: actions/setup-node@v4
        with:
          node-version: '20'
      - name: Install dependencies
        run: npm install
      - name: Run tests
        run: npm test
"
        }
        Language::Python => {
            "      - uses: actions/setup-python@v5
        with:
          python-version: '3.12'
      - name: Install dependencies
        run: pip install -r requirements.txt
      - name: Run tests
        run: pytest tests/python --verbose
        env:
          PYTHONPATH: ${{ github.workspace }}
"
        }
        Language::Julia => {
            "      - uses: julia-actions/setup-julia@v2
        with:
          version: '1.10'
      - name: Install dependencies
        run: julia --project=. -e 'using Pkg; Pkg.instantiate()'
      - name: Start service
        run: |
          GENIE_PORT=8000 julia --project=. app.jl &
          for i in $(seq 1 60); do curl -sf http://127.0.0.1:8000/hello && break; sleep 2; done
      - name: Run tests
        run: julia --project=. -e 'cd(\"tests/julia\"); include(\"test_app.jl\")'
        env:
          APP_URL: http://127.0.0.1:8000
"
        }
    };

    format!(
        "name: CI

on:
  push:
    branches: [ {branch} ]
  pull_request:
    branches: [ {branch} ]

jobs:
  test:
    runs-on: ubuntu-latest
    steps:
      - uses: actions/checkout@v4
{steps}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_json_pins_jest_environment() {
        let manifest: serde_json::Value = serde_json::from_str(&package_json()).unwrap();
        assert_eq!(manifest["scripts"]["test"], "jest --testPathPattern=tests/html");
        assert_eq!(manifest["jest"]["testEnvironment"], "jsdom");
        assert_eq!(manifest["devDependencies"]["jest"], "^29.7.0");
    }

    #[test]
    fn test_workflows_per_language() {
        let python = ci_workflow(Language::Python, "main");
        assert!(python.contains("pytest tests/python --verbose"));
        assert!(python.contains("branches: [ main ]"));

        let julia = ci_workflow(Language::Julia, "main");
        assert!(julia.contains("include(\"test_app.jl\")"));
        assert!(julia.contains("APP_URL"));
        assert!(ci_workflow(Language::Html, "dev").contains("npm test"));
    }
}

//! Service launch commands per language target.
//!
//! Generated services read their port from the environment, so the same
//! command works for any leased port without rewriting generated sources.

use super::CommandSpec;
use crate::core::Language;
use std::path::Path;

/// Command that starts the generated service for `language` on `port`.
#[must_use]
pub fn service_command(language: Language, port: u16, root: &Path) -> CommandSpec {
    let port_str = port.to_string();
    let cmd = match language {
        Language::Html => CommandSpec::new("python3").args([
            "-m",
            "http.server",
            port_str.as_str(),
            "--bind",
            "127.0.0.1",
        ]),
        Language::Python => CommandSpec::new("python3")
            .arg(language.entry_file())
            .env("FLASK_PORT", port_str.as_str()),
        Language::Julia => CommandSpec::new("julia")
            .args(["--project=.", language.entry_file()])
            .env("GENIE_PORT", port_str.as_str()),
    };
    cmd.cwd(root).env("PORT", port_str)
}

/// URL the readiness probe polls for a service on `port`.
#[must_use]
pub fn health_url(language: Language, port: u16) -> String {
    format!("http://127.0.0.1:{port}{}", language.health_path())
}

/// Base URL of a service on `port`.
#[must_use]
pub fn service_url(port: u16) -> String {
    format!("http://127.0.0.1:{port}")
}

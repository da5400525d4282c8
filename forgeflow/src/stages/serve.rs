//! Service launch.

use super::{RunContext, ServiceEndpoint, Stage};
use crate::core::{StageKind, StageOutput};
use crate::errors::ForgeflowError;
use crate::process::{health_url, service_command, service_url, CommandSpec, StartRequest};
use async_trait::async_trait;

/// Leases a port and starts the generated service on it.
///
/// The lease travels with the process into the supervisor, so it is released
/// when the process is stopped, or immediately if the launch fails.
#[derive(Debug, Clone, Default)]
pub struct ServeStage {
    command: Option<CommandSpec>,
}

impl ServeStage {
    /// Creates a stage launching the language's conventional command.
    #[must_use]
    pub const fn new() -> Self {
        Self { command: None }
    }

    /// Launches `command` instead; `PORT` is still set to the leased port.
    #[must_use]
    pub fn with_command(mut self, command: CommandSpec) -> Self {
        self.command = Some(command);
        self
    }
}

#[async_trait]
impl Stage for ServeStage {
    fn kind(&self) -> StageKind {
        StageKind::Serve
    }

    async fn execute(&self, ctx: &RunContext) -> Result<StageOutput, ForgeflowError> {
        let config = ctx.config();
        let language = ctx.language();

        let lease = ctx.allocator.acquire(config.http_port, config.port_range)?;
        let port = lease.port();
        let command = match &self.command {
            Some(cmd) => cmd.clone().cwd(ctx.workdir()).env("PORT", port.to_string()),
            None => service_command(language, port, ctx.workdir()),
        };

        let log = ctx.service_log();
        let process = ctx.supervisor.start(
            StartRequest::new(command, language)
                .with_lease(lease)
                .with_owner(StageKind::Serve)
                .with_log_path(&log),
        )?;

        let endpoint = ServiceEndpoint {
            process: process.id,
            port,
            url: service_url(port),
            health_url: health_url(language, port),
        };
        ctx.set_service(endpoint.clone());

        Ok(StageOutput::ok()
            .with_data("port", serde_json::json!(port))
            .with_data("pid", serde_json::json!(process.pid))
            .with_data("url", serde_json::json!(endpoint.url))
            .with_data("health_url", serde_json::json!(endpoint.health_url))
            .with_data("command", serde_json::json!(process.command))
            .with_output_ref(&log))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::WorkflowConfig;
    use crate::core::Language;
    use crate::ports::PortRange;
    use crate::testing::{context, stub_collaborators};
    use std::time::Duration;

    #[tokio::test]
    async fn test_starts_service_on_leased_port() {
        let dir = tempfile::tempdir().unwrap();
        let config = WorkflowConfig::new(Language::Python, dir.path()).with_http_port(8081);
        let ctx = context(config, stub_collaborators(Language::Python));
        let stage = ServeStage::new().with_command(CommandSpec::new("sleep").arg("30"));

        let output = stage.execute(&ctx).await.unwrap();

        let endpoint = ctx.service().unwrap();
        assert_eq!(endpoint.port, 8081);
        assert_eq!(endpoint.health_url, "http://127.0.0.1:8081/hello");
        assert_eq!(output.get("port"), Some(&serde_json::json!(8081)));
        assert!(ctx.supervisor.is_alive(endpoint.process));
        assert!(ctx.allocator.is_leased(8081));

        ctx.supervisor.stop_all(Duration::from_secs(1)).await;
        assert_eq!(ctx.supervisor.live_count(), 0);
        assert!(!ctx.allocator.is_leased(8081));
    }

    #[tokio::test]
    async fn test_spawn_failure_releases_lease() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(
            WorkflowConfig::new(Language::Julia, dir.path()),
            stub_collaborators(Language::Julia),
        );
        let stage = ServeStage::new().with_command(CommandSpec::new("forgeflow-no-such-binary"));

        let err = stage.execute(&ctx).await.unwrap_err();

        assert_eq!(err.kind(), "spawn_error");
        assert!(ctx.allocator.live_leases().is_empty());
        assert!(ctx.service().is_none());
    }

    #[tokio::test]
    async fn test_exhausted_range() {
        let dir = tempfile::tempdir().unwrap();
        let config = WorkflowConfig::new(Language::Html, dir.path())
            .with_port_range(PortRange::new(9100, 9100).unwrap());
        let ctx = context(config, stub_collaborators(Language::Html));
        let _held = ctx.allocator.acquire(None, PortRange::new(9100, 9100).unwrap()).unwrap();

        let err = ServeStage::new().execute(&ctx).await.unwrap_err();
        assert_eq!(err.kind(), "port_exhausted");
        assert_eq!(ctx.supervisor.started_count(), 0);
    }
}

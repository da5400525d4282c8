//! Readiness wait for the started service.

use super::{RunContext, Stage};
use crate::core::{StageKind, StageOutput};
use crate::errors::{ForgeflowError, ReadinessTimeoutError};
use crate::readiness::Readiness;
use async_trait::async_trait;

/// Polls the service's health URL until it answers.
///
/// Gives up early when the service process exits. A service that never
/// answers fails the stage with a readiness timeout.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProbeStage;

#[async_trait]
impl Stage for ProbeStage {
    fn kind(&self) -> StageKind {
        StageKind::Probe
    }

    async fn execute(&self, ctx: &RunContext) -> Result<StageOutput, ForgeflowError> {
        let Some(endpoint) = ctx.service() else {
            return Err(ForgeflowError::Precondition(
                "no service was started to probe".to_string(),
            ));
        };
        let policy = ctx.config().probe_policy();
        let supervisor = &ctx.supervisor;
        let process = endpoint.process;

        let readiness = ctx
            .probe
            .wait_ready_while(&endpoint.health_url, &policy, || supervisor.is_alive(process))
            .await;

        match readiness {
            Readiness::Ready {
                attempts,
                elapsed,
                status,
            } => {
                ctx.mark_ready();
                Ok(StageOutput::ok()
                    .with_data("url", serde_json::json!(endpoint.health_url))
                    .with_data("attempts", serde_json::json!(attempts))
                    .with_data("status", serde_json::json!(status))
                    .with_data(
                        "elapsed_ms",
                        serde_json::json!(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)),
                    ))
            }
            Readiness::Timeout {
                attempts,
                service_exited,
                ..
            } => Err(ReadinessTimeoutError {
                url: endpoint.health_url,
                attempts,
                service_exited,
            }
            .into()),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::WorkflowConfig;
    use crate::core::Language;
    use crate::process::CommandSpec;
    use crate::readiness::{ProbeAttempt, ProbePolicy};
    use crate::stages::ServeStage;
    use crate::testing::{context, stub_collaborators, ScriptedProber};
    use std::sync::Arc;
    use std::time::Duration;

    fn config(dir: &std::path::Path) -> WorkflowConfig {
        WorkflowConfig::new(Language::Python, dir)
            .with_probe_policy(ProbePolicy::fixed(Duration::from_millis(5), 3))
    }

    async fn serve_sleeper(ctx: &crate::stages::RunContext) {
        ServeStage::new()
            .with_command(CommandSpec::new("sleep").arg("30"))
            .execute(ctx)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_ready_on_second_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let prober = Arc::new(ScriptedProber::new([
            ProbeAttempt::Refused,
            ProbeAttempt::Responded { status: 200 },
        ]));
        let mut collaborators = stub_collaborators(Language::Python);
        collaborators.prober = prober.clone();
        let ctx = context(config(dir.path()), collaborators);
        serve_sleeper(&ctx).await;

        let output = ProbeStage.execute(&ctx).await.unwrap();

        assert!(ctx.is_ready());
        assert_eq!(output.get("attempts"), Some(&serde_json::json!(2)));
        assert_eq!(prober.calls(), 2);
        ctx.supervisor.stop_all(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_never_ready_is_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let mut collaborators = stub_collaborators(Language::Python);
        collaborators.prober = Arc::new(ScriptedProber::always(ProbeAttempt::Refused));
        let ctx = context(config(dir.path()), collaborators);
        serve_sleeper(&ctx).await;

        let err = ProbeStage.execute(&ctx).await.unwrap_err();

        assert_eq!(err.kind(), "readiness_timeout");
        assert!(err.to_string().contains("3 attempts"));
        assert!(!ctx.is_ready());
        ctx.supervisor.stop_all(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_requires_started_service() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(config(dir.path()), stub_collaborators(Language::Python));

        let err = ProbeStage.execute(&ctx).await.unwrap_err();
        assert_eq!(err.kind(), "precondition_failed");
    }
}

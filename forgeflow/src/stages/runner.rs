//! Runs one stage under its timeout and records the result.

use super::{RunContext, Stage, StageSpec};
use crate::core::{ErrorDetail, StageResult, StageStatus};
use crate::errors::ForgeflowError;
use crate::events::{STAGE_COMPLETED, STAGE_STARTED};
use chrono::Utc;
use std::any::Any;
use std::sync::Arc;
use tokio::task::JoinError;
use tokio::time::Instant;
use tracing::{info, warn};

enum Settled {
    Finished(Result<Result<crate::core::StageOutput, ForgeflowError>, JoinError>),
    TimedOut,
    Cancelled(String),
}

/// Executes stages one at a time.
///
/// The stage body runs on its own task so a panic or a timeout is contained:
/// the task is aborted, anything it owned is dropped, and processes the
/// stage registered with the supervisor are stopped before the result is
/// returned.
#[derive(Debug, Clone, Copy, Default)]
pub struct StageRunner;

impl StageRunner {
    /// Runs `stage` as described by `spec`. Never fails; every outcome is a
    /// [`StageResult`].
    pub async fn run(spec: StageSpec, stage: Arc<dyn Stage>, ctx: &Arc<RunContext>) -> StageResult {
        let kind = spec.stage;
        let started_at = Utc::now();
        let clock = Instant::now();

        ctx.events().try_emit(
            STAGE_STARTED,
            Some(serde_json::json!({
                "stage": kind,
                "policy": spec.policy,
                "timeout_secs": spec.timeout.as_secs(),
            })),
        );
        info!(stage = %kind, policy = %spec.policy, "Stage started");

        let task_ctx = Arc::clone(ctx);
        let mut handle = tokio::spawn(async move { stage.execute(&task_ctx).await });

        let settled = tokio::select! {
            joined = &mut handle => Settled::Finished(joined),
            () = tokio::time::sleep(spec.timeout) => Settled::TimedOut,
            () = ctx.cancellation().cancelled() => Settled::Cancelled(
                ctx.cancellation().reason().unwrap_or_else(|| "cancelled".to_string()),
            ),
        };
        if !matches!(settled, Settled::Finished(_)) {
            handle.abort();
            // Wait for the abort so the stage's owned resources are dropped.
            let _ = handle.await;
        }
        let elapsed = clock.elapsed();

        let mut result = match settled {
            Settled::Finished(Ok(Ok(output))) => {
                StageResult::from_output(kind, spec.policy, started_at, elapsed, output)
            }
            Settled::Finished(Ok(Err(err))) => StageResult::failed(
                kind,
                spec.policy,
                StageStatus::Failed,
                started_at,
                elapsed,
                ErrorDetail::from(&err),
            ),
            Settled::Finished(Err(join_err)) => StageResult::failed(
                kind,
                spec.policy,
                StageStatus::Failed,
                started_at,
                elapsed,
                join_failure(join_err),
            ),
            Settled::TimedOut => StageResult::failed(
                kind,
                spec.policy,
                StageStatus::TimedOut,
                started_at,
                elapsed,
                ErrorDetail {
                    kind: "timeout".to_string(),
                    message: format!(
                        "Stage '{kind}' exceeded its {}s timeout",
                        spec.timeout.as_secs_f64()
                    ),
                },
            ),
            Settled::Cancelled(reason) => StageResult::failed(
                kind,
                spec.policy,
                StageStatus::Failed,
                started_at,
                elapsed,
                ErrorDetail::from(&ForgeflowError::Cancelled(reason)),
            ),
        };

        if !result.status.is_success() {
            let stopped = ctx
                .supervisor
                .stop_owned_by(kind, ctx.config().grace_timeout())
                .await;
            if !stopped.is_empty() {
                info!(stage = %kind, count = stopped.len(), "Stopped processes of unsuccessful stage");
            }
            let log = ctx.stage_log(kind);
            if result.output_ref.is_none() && log.exists() {
                result = result.with_output_ref(Some(log));
            }
        }

        ctx.events().try_emit(
            STAGE_COMPLETED,
            Some(serde_json::json!({
                "stage": kind,
                "status": result.status,
                "duration_ms": result.duration_ms,
                "error": result.error.as_ref().map(|e| e.kind.clone()),
            })),
        );
        match result.cause() {
            Some(cause) if result.status.is_failure() => {
                warn!(stage = %kind, status = %result.status, duration_ms = result.duration_ms, cause = %cause, "Stage failed");
            }
            Some(cause) => {
                info!(stage = %kind, status = %result.status, reason = %cause, "Stage skipped");
            }
            None => {
                info!(stage = %kind, status = %result.status, duration_ms = result.duration_ms, "Stage completed");
            }
        }
        result
    }
}

fn join_failure(err: JoinError) -> ErrorDetail {
    if err.is_panic() {
        ErrorDetail {
            kind: "panic".to_string(),
            message: format!("Stage panicked: {}", panic_message(err.into_panic().as_ref())),
        }
    } else {
        ErrorDetail {
            kind: "cancelled".to_string(),
            message: "Stage task was cancelled".to_string(),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

//! The run report.

use crate::config::WorkflowConfig;
use crate::core::{Language, RunOutcome, StageKind, StageResult};
use crate::errors::ForgeflowError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use tracing::warn;
use uuid::Uuid;

/// Record of one run: what was asked for and how every stage ended.
///
/// Stage results are append-only; once finalized the report no longer
/// changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    /// Run id.
    pub run_id: Uuid,
    /// Target language.
    pub language: Language,
    /// Artifact root.
    pub working_dir: PathBuf,
    /// Port requested on the command line, if any.
    pub requested_port: Option<u16>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run was finalized.
    pub finished_at: Option<DateTime<Utc>>,
    /// Results in plan order.
    pub stages: Vec<StageResult>,
    /// Overall outcome, set on finalize.
    pub outcome: Option<RunOutcome>,
}

impl WorkflowRun {
    /// Starts a report for `config`.
    #[must_use]
    pub fn new(run_id: Uuid, config: &WorkflowConfig) -> Self {
        Self {
            run_id,
            language: config.language,
            working_dir: config.working_dir.clone(),
            requested_port: config.http_port,
            started_at: Utc::now(),
            finished_at: None,
            stages: Vec::new(),
            outcome: None,
        }
    }

    pub(crate) fn record(&mut self, result: StageResult) {
        if self.is_finalized() {
            warn!(stage = %result.stage, "Ignoring stage result recorded after finalize");
            return;
        }
        self.stages.push(result);
    }

    pub(crate) fn finalize(&mut self) {
        if self.is_finalized() {
            return;
        }
        self.outcome = Some(RunOutcome::from_statuses(
            self.stages.iter().map(|s| (s.policy, s.outcome_status())),
        ));
        self.finished_at = Some(Utc::now());
    }

    /// Returns true once the outcome is fixed.
    #[must_use]
    pub const fn is_finalized(&self) -> bool {
        self.outcome.is_some()
    }

    /// The overall outcome; computed from the stages if not yet finalized.
    #[must_use]
    pub fn outcome(&self) -> RunOutcome {
        self.outcome.unwrap_or_else(|| {
            RunOutcome::from_statuses(self.stages.iter().map(|s| (s.policy, s.outcome_status())))
        })
    }

    /// Process exit code for the outcome.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        self.outcome().exit_code()
    }

    /// The result of `stage`, if it was planned.
    #[must_use]
    pub fn stage(&self, stage: StageKind) -> Option<&StageResult> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    /// Human-readable log: a header, then one line per stage.
    #[must_use]
    pub fn render_log(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "run {} language={} started={} outcome={}",
            self.run_id,
            self.language,
            self.started_at.to_rfc3339(),
            self.outcome()
        );
        for stage in &self.stages {
            let _ = write!(
                out,
                "  {:<9} {:<10} {:>8}ms",
                stage.stage.as_str(),
                stage.status.to_string(),
                stage.duration_ms
            );
            if let Some(cause) = stage.cause() {
                let _ = write!(out, "  {cause}");
            }
            if let Some(output) = &stage.output_ref {
                let _ = write!(out, "  [{}]", output.display());
            }
            out.push('\n');
        }
        out
    }

    /// Writes the JSON report to `<state_dir>/runs/<run_id>.json` and appends
    /// the rendered log to `<state_dir>/run.log`. Returns the JSON path.
    pub fn persist(&self, state_dir: &Path) -> Result<PathBuf, ForgeflowError> {
        let runs = state_dir.join("runs");
        std::fs::create_dir_all(&runs)?;
        let path = runs.join(format!("{}.json", self.run_id));
        std::fs::write(&path, serde_json::to_string_pretty(self)?)?;

        let mut log = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(state_dir.join("run.log"))?;
        log.write_all(self.render_log().as_bytes())?;
        Ok(path)
    }
}

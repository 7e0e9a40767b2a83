//! Pipeline run state machine.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{FailureStage, PipelineError, RunFailure, TransitionError};
use crate::obs;

/// Orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Idle,
    GatheringContext,
    InvokingModel,
    ExtractingArtifact,
    ValidatingSchema,
    LintingOptional,
    Building,
    Complete,
    Failed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Idle => "idle",
            Stage::GatheringContext => "gathering_context",
            Stage::InvokingModel => "invoking_model",
            Stage::ExtractingArtifact => "extracting_artifact",
            Stage::ValidatingSchema => "validating_schema",
            Stage::LintingOptional => "linting_optional",
            Stage::Building => "building",
            Stage::Complete => "complete",
            Stage::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Complete | Stage::Failed)
    }

    /// Legal forward edges. `Failed` is reachable from any non-terminal state.
    ///
    /// Besides the full synthesize-and-render path:
    /// - pipelines over an existing manifest start at `ValidatingSchema`
    /// - synthesize-only runs complete after validation (and lint)
    /// - plan-only runs may complete straight from `Idle`
    pub fn can_advance_to(&self, next: Stage) -> bool {
        use Stage::*;
        if next == Failed {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (Idle, GatheringContext)
                | (Idle, ValidatingSchema)
                | (Idle, Complete)
                | (GatheringContext, InvokingModel)
                | (InvokingModel, ExtractingArtifact)
                | (ExtractingArtifact, ValidatingSchema)
                | (ValidatingSchema, LintingOptional)
                | (ValidatingSchema, Building)
                | (ValidatingSchema, Complete)
                | (LintingOptional, Building)
                | (LintingOptional, Complete)
                | (Building, Complete)
        )
    }

    /// Stage tag used when a failure happens while in this state.
    pub fn failure_stage(&self) -> FailureStage {
        match self {
            Stage::Idle | Stage::GatheringContext => FailureStage::Context,
            Stage::InvokingModel => FailureStage::Model,
            Stage::ExtractingArtifact => FailureStage::Extraction,
            Stage::ValidatingSchema => FailureStage::Schema,
            Stage::LintingOptional => FailureStage::Lint,
            Stage::Building | Stage::Complete | Stage::Failed => FailureStage::Build,
        }
    }

    /// Status line appended when the stage is entered.
    fn narrative(&self) -> Option<&'static str> {
        match self {
            Stage::GatheringContext => Some("Reading context store..."),
            Stage::InvokingModel => Some("Syncing with LLM provider..."),
            Stage::ExtractingArtifact => Some("Extracting manifest from model response..."),
            Stage::ValidatingSchema => Some("Validating manifest schema (vcr check)..."),
            Stage::LintingOptional => Some("Linting manifest (advisory)..."),
            Stage::Building => Some("Manifest validated. Starting render..."),
            Stage::Idle | Stage::Complete | Stage::Failed => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One top-level orchestrator invocation.
///
/// Owned by the task driving the run; never shared between runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub run_id: Uuid,
    /// Pipeline name (`render`, `execute`, ...).
    pub pipeline: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub stage: Stage,
    /// Human-readable narrative of the run, in order.
    pub status_log: Vec<String>,
    /// Non-fatal problems (context degradation, lint warnings).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub error: Option<RunFailure>,
}

impl PipelineRun {
    pub fn new(pipeline: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            pipeline: pipeline.into(),
            started_at: Utc::now(),
            finished_at: None,
            stage: Stage::Idle,
            status_log: Vec::new(),
            warnings: Vec::new(),
            error: None,
        }
    }

    /// Move to `next`, appending its status line.
    pub fn advance(&mut self, next: Stage) -> Result<(), TransitionError> {
        if next == Stage::Failed || !self.stage.can_advance_to(next) {
            return Err(TransitionError {
                from: self.stage.to_string(),
                to: next.to_string(),
                stage: self.stage,
            });
        }
        self.stage = next;
        obs::emit_stage_entered(&self.run_id.to_string(), next);
        if let Some(line) = next.narrative() {
            self.log(line);
        }
        if next == Stage::Complete {
            self.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Terminate the run with `err`. A no-op on an already terminal run.
    pub fn fail(&mut self, err: &PipelineError) {
        if self.stage.is_terminal() {
            return;
        }
        let failure = RunFailure::from(err);
        self.log(format!("FAILED [{}]: {}", failure.stage, failure.reason));
        self.stage = Stage::Failed;
        self.error = Some(failure);
        self.finished_at = Some(Utc::now());
    }

    pub fn log(&mut self, line: impl Into<String>) {
        self.status_log.push(line.into());
    }

    /// Record a non-fatal problem in both the warnings and the narrative.
    pub fn warn(&mut self, warning: impl Into<String>) {
        let warning = warning.into();
        self.log(format!("warning: {warning}"));
        self.warnings.push(warning);
    }

    pub fn succeeded(&self) -> bool {
        self.stage == Stage::Complete
    }

    pub fn duration_ms(&self) -> u64 {
        let end = self.finished_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_milliseconds().max(0) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_render_path_is_legal() {
        let mut run = PipelineRun::new("render");
        for stage in [
            Stage::GatheringContext,
            Stage::InvokingModel,
            Stage::ExtractingArtifact,
            Stage::ValidatingSchema,
            Stage::LintingOptional,
            Stage::Building,
            Stage::Complete,
        ] {
            run.advance(stage).unwrap();
        }
        assert!(run.succeeded());
        assert!(run.finished_at.is_some());
        assert_eq!(run.status_log[0], "Reading context store...");
    }

    #[test]
    fn test_build_requires_validation_first() {
        let mut run = PipelineRun::new("render");
        run.advance(Stage::GatheringContext).unwrap();
        run.advance(Stage::InvokingModel).unwrap();
        run.advance(Stage::ExtractingArtifact).unwrap();
        let err = run.advance(Stage::Building).unwrap_err();
        assert_eq!(err.stage, Stage::ExtractingArtifact);
        assert_eq!(run.stage, Stage::ExtractingArtifact);
    }

    #[test]
    fn test_fail_records_stage_and_reason() {
        let mut run = PipelineRun::new("render");
        run.advance(Stage::GatheringContext).unwrap();
        run.advance(Stage::InvokingModel).unwrap();
        run.fail(&PipelineError::ModelEmptyResponse);

        assert_eq!(run.stage, Stage::Failed);
        let failure = run.error.as_ref().unwrap();
        assert_eq!(failure.stage, FailureStage::Model);
        assert!(run.status_log.last().unwrap().starts_with("FAILED [Model]"));
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut run = PipelineRun::new("plan");
        run.advance(Stage::Complete).unwrap();
        assert!(run.advance(Stage::Building).is_err());

        run.fail(&PipelineError::ExtractionEmpty);
        assert_eq!(run.stage, Stage::Complete);
        assert!(run.error.is_none());
    }

    #[test]
    fn test_existing_manifest_skips_model_stages() {
        assert!(Stage::Idle.can_advance_to(Stage::ValidatingSchema));
        assert!(!Stage::Idle.can_advance_to(Stage::Building));
        assert!(!Stage::GatheringContext.can_advance_to(Stage::ExtractingArtifact));
    }
}

//! Error taxonomy for render pipelines.
//!
//! Every failure a run can hit maps to exactly one [`FailureStage`]; the
//! orchestrator converts errors into a [`RunFailure`] at the stage boundary.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use vcr_tool::ToolError;

use super::plan::PlanField;
use super::run::Stage;

/// Stage tag attached to a failed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureStage {
    Context,
    Model,
    Extraction,
    Schema,
    Lint,
    Build,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureStage::Context => "Context",
            FailureStage::Model => "Model",
            FailureStage::Extraction => "Extraction",
            FailureStage::Schema => "Schema",
            FailureStage::Lint => "Lint",
            FailureStage::Build => "Build",
        };
        f.write_str(s)
    }
}

/// One render plan violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldError {
    #[error("missing field: {field}")]
    Missing { field: PlanField },

    #[error("{field} = '{value}' not in {allowed}")]
    IllegalValue {
        field: PlanField,
        value: String,
        allowed: String,
    },

    #[error("{field} = '{value}' {reason}")]
    Malformed {
        field: PlanField,
        value: String,
        reason: String,
    },

    #[error("{field} = '{value}' is inconsistent with {other} = '{other_value}' (expected '{expected}')")]
    Inconsistent {
        field: PlanField,
        value: String,
        other: PlanField,
        other_value: String,
        expected: String,
    },
}

impl FieldError {
    pub fn field(&self) -> PlanField {
        match self {
            FieldError::Missing { field }
            | FieldError::IllegalValue { field, .. }
            | FieldError::Malformed { field, .. }
            | FieldError::Inconsistent { field, .. } => *field,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, FieldError::Missing { .. })
    }
}

/// Illegal state-machine or artifact transition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("illegal transition from {from} to {to}")]
pub struct TransitionError {
    pub from: String,
    pub to: String,
    pub stage: Stage,
}

/// Render pipeline errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("{0}")]
    ToolNotFound(String),

    #[error("context store unavailable: {0}")]
    ContextUnavailable(String),

    #[error("could not connect to LLM at {endpoint}: {message}. Configure VCR_LLM_ENDPOINT, VCR_LLM_MODEL, and optionally VCR_LLM_API_KEY to point to any OpenAI-compatible provider")]
    ModelConnect { endpoint: String, message: String },

    #[error("LLM returned HTTP {status}: {body}")]
    ModelHttp { status: u16, body: String },

    #[error("LLM request timed out after {} seconds", .timeout.as_secs_f64())]
    ModelTimeout { timeout: Duration },

    #[error("LLM returned empty response (no choices)")]
    ModelEmptyResponse,

    #[error("LLM returned an unreadable response: {0}")]
    ModelInvalidResponse(String),

    #[error("could not extract a manifest from the LLM response")]
    ExtractionEmpty,

    #[error("render plan failed validation: {}", join_field_errors(.0))]
    SchemaInvalid(Vec<FieldError>),

    #[error("manifest rejected by `vcr check` (exit {exit_code}): {diagnostics}")]
    SchemaRejected { exit_code: i32, diagnostics: String },

    #[error("lint warnings: {0}")]
    LintWarning(String),

    #[error("render failed (exit {exit_code}): {stderr}")]
    BuildFailed { exit_code: i32, stderr: String },

    #[error("render exited 0 but produced no output at {}", .path.display())]
    OutputMissing { path: PathBuf },

    #[error("`{command}` timed out after {} seconds", .timeout.as_secs_f64())]
    ToolTimeout {
        stage: FailureStage,
        command: String,
        timeout: Duration,
    },

    #[error("run cancelled during {stage} stage")]
    Cancelled { stage: FailureStage },

    #[error("render tool error: {source}")]
    Tool {
        stage: FailureStage,
        #[source]
        source: ToolError,
    },

    #[error("io error: {source}")]
    Io {
        stage: FailureStage,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

impl PipelineError {
    /// Stage this error is attributed to.
    pub fn stage(&self) -> FailureStage {
        match self {
            PipelineError::ToolNotFound(_) => FailureStage::Build,
            PipelineError::ContextUnavailable(_) => FailureStage::Context,
            PipelineError::ModelConnect { .. }
            | PipelineError::ModelHttp { .. }
            | PipelineError::ModelTimeout { .. }
            | PipelineError::ModelEmptyResponse
            | PipelineError::ModelInvalidResponse(_) => FailureStage::Model,
            PipelineError::ExtractionEmpty => FailureStage::Extraction,
            PipelineError::SchemaInvalid(_) | PipelineError::SchemaRejected { .. } => {
                FailureStage::Schema
            }
            PipelineError::LintWarning(_) => FailureStage::Lint,
            PipelineError::BuildFailed { .. } | PipelineError::OutputMissing { .. } => {
                FailureStage::Build
            }
            PipelineError::ToolTimeout { stage, .. }
            | PipelineError::Cancelled { stage }
            | PipelineError::Tool { stage, .. }
            | PipelineError::Io { stage, .. } => *stage,
            PipelineError::Transition(e) => e.stage.failure_stage(),
        }
    }

    /// Stable machine-readable tag for the error cause.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::ToolNotFound(_) => "tool_not_found",
            PipelineError::ContextUnavailable(_) => "context_unavailable",
            PipelineError::ModelConnect { .. } => "model_connect_error",
            PipelineError::ModelHttp { .. } => "model_http_error",
            PipelineError::ModelTimeout { .. } => "model_timeout",
            PipelineError::ModelEmptyResponse => "model_empty_response",
            PipelineError::ModelInvalidResponse(_) => "model_invalid_response",
            PipelineError::ExtractionEmpty => "extraction_empty",
            PipelineError::SchemaInvalid(_) => "schema_invalid",
            PipelineError::SchemaRejected { .. } => "schema_rejected",
            PipelineError::LintWarning(_) => "lint_warning",
            PipelineError::BuildFailed { .. } => "build_failed",
            PipelineError::OutputMissing { .. } => "output_missing",
            PipelineError::ToolTimeout { .. } => "tool_timeout",
            PipelineError::Cancelled { .. } => "cancelled",
            PipelineError::Tool { .. } => "tool_error",
            PipelineError::Io { .. } => "io_error",
            PipelineError::Transition(_) => "illegal_transition",
        }
    }

    /// Whether the run can continue past this error.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            PipelineError::ContextUnavailable(_) | PipelineError::LintWarning(_)
        )
    }

    /// Map a render-tool error raised during `stage`.
    pub fn from_tool(stage: FailureStage, err: ToolError) -> Self {
        match err {
            ToolError::NotFound { .. } => PipelineError::ToolNotFound(err.to_string()),
            ToolError::Timeout { command, timeout } => PipelineError::ToolTimeout {
                stage,
                command,
                timeout,
            },
            ToolError::Cancelled { .. } => PipelineError::Cancelled { stage },
            other => PipelineError::Tool {
                stage,
                source: other,
            },
        }
    }

    pub fn io(stage: FailureStage, source: std::io::Error) -> Self {
        PipelineError::Io { stage, source }
    }
}

fn join_field_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Serializable record of a failed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    pub stage: FailureStage,
    pub kind: String,
    /// Raw diagnostic text from the failing stage.
    pub reason: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub field_errors: Vec<FieldError>,
}

impl From<&PipelineError> for RunFailure {
    fn from(err: &PipelineError) -> Self {
        let field_errors = match err {
            PipelineError::SchemaInvalid(errors) => errors.clone(),
            _ => Vec::new(),
        };
        Self {
            stage: err.stage(),
            kind: err.kind().to_string(),
            reason: err.to_string(),
            field_errors,
        }
    }
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

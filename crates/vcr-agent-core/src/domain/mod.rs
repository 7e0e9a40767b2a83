//! Domain types for render pipelines.

pub mod artifact;
pub mod error;
pub mod plan;
pub mod run;

pub use artifact::{text_digest, ManifestArtifact, ValidationState};
pub use error::{FailureStage, FieldError, PipelineError, Result, RunFailure, TransitionError};
pub use plan::{DeterminismMode, PlanDraft, PlanField, ProresProfile, RenderPlan, Resolution};
pub use run::{PipelineRun, Stage};

//! vcr-agent-core: render orchestration for the VCR agent
//!
//! Layer 2. Turns a natural-language request into a validated manifest and
//! a rendered file, or into a structured render plan another agent can run.
//!
//! # Modules
//!
//! - `domain` - Plans, runs, stages, artifacts and the error taxonomy
//! - `plan` - Plan validation, synthesis and plan documents
//! - `context` - Optional context retrieval
//! - `llm` - OpenAI-compatible generator client
//! - `extract` - Manifest extraction from model output
//! - `orchestrator` - Pipelines and their state machine
//! - `config` - Environment-driven configuration
//! - `obs` / `telemetry` - Run-scoped tracing

pub mod config;
pub mod context;
pub mod domain;
pub mod extract;
pub mod fakes;
pub mod llm;
pub mod obs;
pub mod orchestrator;
pub mod plan;
pub mod telemetry;

pub use config::{AgentConfig, ConfigError, LlmConfig, PathsConfig, DEFAULT_LLM_ENDPOINT};
pub use context::{ContextBundle, ContextRetriever};
pub use domain::{
    text_digest, DeterminismMode, FailureStage, FieldError, ManifestArtifact, PipelineError,
    PipelineRun, PlanDraft, PlanField, ProresProfile, RenderPlan, Resolution, Result, RunFailure,
    Stage, TransitionError, ValidationState,
};
pub use extract::{extract_manifest, Extraction, ExtractionMethod};
pub use fakes::ScriptedModelClient;
pub use llm::{ChatMessage, ChatRequest, ModelClient, OpenAiCompatClient, FALLBACK_MODEL};
pub use orchestrator::{Orchestrator, PipelineOptions, PipelineOutcome};
pub use plan::{
    output_stem, validate, validate_document, validate_live, DocumentReport, PlanRequest,
    PlanResponse,
};
pub use telemetry::init_tracing;

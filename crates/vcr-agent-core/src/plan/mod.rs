//! Render plans: validation, synthesis, and plan documents.

pub mod document;
pub mod synthesize;
pub mod validate;

pub use document::{
    extract_cli_commands, parse_plan_fields, parse_sections, referenced_manifests,
    validate_document, validate_live, DocumentReport, Section,
};
pub use synthesize::{output_stem, slugify, PlanRequest, PlanResponse};
pub use validate::validate;

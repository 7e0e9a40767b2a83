//! In-process plan synthesis from a prompt plus optional overrides.
//!
//! Produces the structured response a calling agent uses to decide which
//! render-tool commands to run. Nothing here executes anything.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::validate::validate;
use crate::domain::{FieldError, PlanDraft, PlanField, RenderPlan, Resolution};

pub const DEFAULT_FPS: u32 = 24;
pub const DEFAULT_DURATION: f64 = 5.0;
pub const DEFAULT_BACKEND: &str = "software";

const SLUG_MAX_LEN: usize = 40;
const FALLBACK_SLUG: &str = "render";
const MANIFEST_PLACEHOLDER: &str = "<MANIFEST_PATH>";

/// A plan request. Unset overrides take the defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanRequest {
    pub prompt: String,
    #[serde(default)]
    pub resolution: Option<String>,
    #[serde(default)]
    pub fps: Option<u32>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub alpha: Option<bool>,
    /// Kept as text so illegal values surface as plan violations.
    #[serde(default)]
    pub backend: Option<String>,
    /// Existing manifest to check and reference in the commands.
    #[serde(default)]
    pub manifest_path: Option<PathBuf>,
}

impl PlanRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    /// Raw plan fields with defaults applied and derived fields filled in.
    pub fn draft(&self) -> PlanDraft {
        let backend = self
            .backend
            .clone()
            .unwrap_or_else(|| DEFAULT_BACKEND.to_string());
        let alpha = self.alpha.unwrap_or(false);
        let determinism = if backend.trim().eq_ignore_ascii_case("software") {
            "on"
        } else {
            "off"
        };
        let profile = if alpha { "4444" } else { "422hq" };

        PlanDraft::new()
            .with(
                PlanField::Resolution,
                self.resolution
                    .clone()
                    .unwrap_or_else(|| Resolution::DEFAULT.to_string()),
            )
            .with(PlanField::Fps, self.fps.unwrap_or(DEFAULT_FPS).to_string())
            .with(
                PlanField::Duration,
                format!("{:?}", self.duration.unwrap_or(DEFAULT_DURATION)),
            )
            .with(PlanField::Backend, backend)
            .with(PlanField::Alpha, alpha.to_string())
            .with(PlanField::ProresProfile, profile)
            .with(PlanField::DeterminismMode, determinism)
    }
}

/// Output file stem derived from a prompt.
///
/// Lowercased and trimmed, runs of non-alphanumerics collapsed to `_`,
/// truncated to 40 characters, then stripped of edge underscores.
pub fn slugify(prompt: &str) -> String {
    let lower = prompt.trim().to_lowercase();
    let mut slug = String::with_capacity(lower.len());
    let mut in_gap = false;
    for c in lower.chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            slug.push(c);
            in_gap = false;
        } else if !in_gap {
            slug.push('_');
            in_gap = true;
        }
    }
    let truncated: String = slug.chars().take(SLUG_MAX_LEN).collect();
    truncated.trim_matches('_').to_string()
}

/// Slug with a fallback for prompts that contain no usable characters.
pub fn output_stem(prompt: &str) -> String {
    let slug = slugify(prompt);
    if slug.is_empty() {
        FALLBACK_SLUG.to_string()
    } else {
        slug
    }
}

/// Structured render plan handed back to the calling agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanResponse {
    pub intent_summary: String,
    pub render_plan: RenderPlan,
    /// Render-tool invocations the caller may choose to run, in order.
    pub cli_commands: Vec<String>,
    pub expected_outputs: Vec<String>,
    /// Post-hoc checks on the output, in order.
    pub validation_steps: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest_validation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_assets: Option<String>,
}

impl PlanResponse {
    /// Synthesize and validate a plan. No tool is run.
    ///
    /// With a manifest the commands reference it and `manifest_validation`
    /// is left for [`PlanResponse::record_manifest_check`]; without one the
    /// commands use a placeholder and `required_assets` says what to write.
    pub fn synthesize(request: &PlanRequest) -> Result<Self, Vec<FieldError>> {
        let plan = validate(&request.draft())?;
        let output = format!("renders/{}.mov", output_stem(&request.prompt));

        let mut validation_steps = vec![
            format!("test -f {output}"),
            format!(
                "ffprobe -v error -select_streams v:0 -show_entries stream=codec_name,pix_fmt {output}"
            ),
        ];
        if plan.alpha() {
            validation_steps.push("Expect pix_fmt=yuva444p10le (alpha present)".to_string());
        }

        let manifest = request
            .manifest_path
            .as_deref()
            .map(|p| p.display().to_string());
        let required_assets = manifest.is_none().then(|| {
            "A .vcr manifest matching this request. Write it, then validate with: vcr check <file>"
                .to_string()
        });
        let cli_commands = commands_for(
            manifest.as_deref().unwrap_or(MANIFEST_PLACEHOLDER),
            &output,
            &plan,
        );

        Ok(Self {
            intent_summary: request.prompt.clone(),
            render_plan: plan,
            cli_commands,
            expected_outputs: vec![output],
            validation_steps,
            manifest_validation: None,
            required_assets,
        })
    }

    /// Attach the outcome of `vcr check` on the supplied manifest.
    ///
    /// A failed check withdraws the commands: they would not build.
    pub fn record_manifest_check(&mut self, passed: bool, diagnostics: &str) {
        if passed {
            self.manifest_validation = Some("PASSED".to_string());
        } else {
            self.manifest_validation = Some(format!("FAILED: {}", diagnostics.trim()));
            self.cli_commands.clear();
        }
    }
}

fn commands_for(manifest: &str, output: &str, plan: &RenderPlan) -> Vec<String> {
    vec![
        format!("vcr check {manifest}"),
        format!(
            "vcr build {manifest} -o {output} --backend {}",
            plan.backend()
        ),
    ]
}

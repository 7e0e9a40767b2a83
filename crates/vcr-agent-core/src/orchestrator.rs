//! Render orchestration: composes context, generation, validation and the
//! render tool into pipelines, and owns all error-recovery policy.
//!
//! Pipelines:
//! - `plan`: synthesize a render plan, optionally checking a manifest
//! - `synthesize`: context, model, extraction, schema check, lint
//! - `render`: `synthesize` followed by a build
//! - `execute`: schema check, lint and build of an existing manifest
//! - `render_frame`: like `execute`, rendering a single frame
//!
//! Every pipeline returns a [`PipelineOutcome`]; stage failures are caught
//! at the stage boundary and never escape as errors or panics. The schema
//! gate always precedes a build.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;
use vcr_tool::{
    parse_frame_progress, progress_lines, wait_cancelled, Backend, CancelSignal, RenderCommand,
    ToolInvocation, ToolRunner, ToolTimeouts,
};

use crate::config::{AgentConfig, PathsConfig};
use crate::context::ContextRetriever;
use crate::domain::{
    ManifestArtifact, PipelineError, PipelineRun, Result, RunFailure, Stage, TransitionError,
};
use crate::extract::extract_manifest;
use crate::llm::{user_message, ChatRequest, ModelClient, FALLBACK_MODEL, SYSTEM_PROMPT};
use crate::obs::{self, RunSpan};
use crate::plan::{output_stem, PlanRequest, PlanResponse};

/// Per-run knobs.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOptions {
    /// Run the advisory lint pass.
    pub lint: bool,
    /// Passed through to `build` / `render-frame`.
    pub backend: Option<Backend>,
    /// Output file; the manifest is written next to it as `.vcr`.
    pub output: Option<PathBuf>,
    /// Overall wall-clock budget for the run.
    pub deadline: Option<Duration>,
    /// Context keys; `None` (or empty) samples the store.
    pub context_keys: Option<Vec<String>>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            lint: true,
            backend: None,
            output: None,
            deadline: None,
            context_keys: None,
        }
    }
}

/// Structured result of one pipeline run, success or failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineOutcome {
    #[serde(flatten)]
    pub run: PipelineRun,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ManifestArtifact>,
    /// Absolute path of the rendered output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<PlanResponse>,
}

impl PipelineOutcome {
    pub fn succeeded(&self) -> bool {
        self.run.succeeded()
    }

    pub fn failure(&self) -> Option<&RunFailure> {
        self.run.error.as_ref()
    }
}

/// Remaining budget of a run.
#[derive(Debug, Clone, Copy)]
struct Deadline {
    limit: Option<Duration>,
    end: Option<Instant>,
}

impl Deadline {
    fn start(limit: Option<Duration>) -> Self {
        Self {
            limit,
            end: limit.map(|l| Instant::now() + l),
        }
    }

    /// `min(own, remaining)`, or `None` once the run budget is spent.
    fn budget(&self, own: Duration) -> Option<Duration> {
        match self.end {
            None => Some(own),
            Some(end) => {
                let remaining = end.saturating_duration_since(Instant::now());
                (!remaining.is_zero()).then(|| own.min(remaining))
            }
        }
    }

    fn limit(&self) -> Duration {
        self.limit.unwrap_or_default()
    }
}

/// Mutable state of one run, owned by the task driving it.
struct RunState {
    run: PipelineRun,
    deadline: Deadline,
    cancel: Option<CancelSignal>,
    artifact: Option<ManifestArtifact>,
    output: Option<PathBuf>,
    plan: Option<PlanResponse>,
}

impl RunState {
    fn new(pipeline: &str, options: &PipelineOptions, cancel: Option<CancelSignal>) -> Self {
        Self {
            run: PipelineRun::new(pipeline),
            deadline: Deadline::start(options.deadline),
            cancel,
            artifact: None,
            output: None,
            plan: None,
        }
    }

    fn run_id(&self) -> String {
        self.run.run_id.to_string()
    }

    fn cancelled(&self) -> PipelineError {
        PipelineError::Cancelled {
            stage: self.run.stage.failure_stage(),
        }
    }

    /// Enter `stage`, unless the run was cancelled in between.
    fn advance(&mut self, stage: Stage) -> Result<()> {
        if stage != Stage::Complete && self.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
            return Err(self.cancelled());
        }
        self.run.advance(stage)?;
        Ok(())
    }

    fn finish(mut self, result: Result<()>) -> PipelineOutcome {
        let run_id = self.run_id();
        match result {
            Ok(()) => {
                if !self.run.stage.is_terminal() {
                    // Pipelines end in Complete; reaching here otherwise is a bug
                    if let Err(e) = self.run.advance(Stage::Complete) {
                        self.run.fail(&PipelineError::from(e));
                    }
                }
            }
            Err(e) => {
                obs::emit_run_failed(&run_id, &e);
                self.run.fail(&e);
            }
        }
        obs::emit_run_finished(&run_id, self.run.duration_ms(), self.run.succeeded());
        PipelineOutcome {
            run: self.run,
            artifact: self.artifact,
            output: self.output,
            plan: self.plan,
        }
    }
}

/// Drives pipeline runs. Cheap to clone; runs share only read-only state.
#[derive(Clone)]
pub struct Orchestrator {
    paths: Arc<PathsConfig>,
    timeouts: ToolTimeouts,
    chat_timeout: Duration,
    context: Arc<ContextRetriever>,
    model: Arc<dyn ModelClient>,
    tool: std::result::Result<Arc<dyn ToolRunner>, Arc<str>>,
}

impl Orchestrator {
    pub fn new(
        config: &AgentConfig,
        context: ContextRetriever,
        model: Arc<dyn ModelClient>,
        tool: Arc<dyn ToolRunner>,
    ) -> Self {
        Self {
            paths: Arc::new(config.paths.clone()),
            timeouts: config.tools.clone(),
            chat_timeout: config.llm.chat_timeout,
            context: Arc::new(context),
            model,
            tool: Ok(tool),
        }
    }

    /// An orchestrator whose render tool could not be resolved.
    ///
    /// Pipelines that never touch the tool still work; any other pipeline
    /// fails with `ToolNotFound` carrying `reason`.
    pub fn without_tool(
        config: &AgentConfig,
        context: ContextRetriever,
        model: Arc<dyn ModelClient>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            paths: Arc::new(config.paths.clone()),
            timeouts: config.tools.clone(),
            chat_timeout: config.llm.chat_timeout,
            context: Arc::new(context),
            model,
            tool: Err(Arc::from(reason.into())),
        }
    }

    fn tool(&self) -> Result<&Arc<dyn ToolRunner>> {
        self.tool
            .as_ref()
            .map_err(|reason| PipelineError::ToolNotFound(reason.to_string()))
    }

    /// Synthesize a render plan; check `request.manifest_path` if given.
    ///
    /// A manifest that fails `vcr check` is reported inside the plan
    /// (`manifest_validation`), not as a failed run.
    pub async fn plan(&self, request: &PlanRequest, cancel: Option<CancelSignal>) -> PipelineOutcome {
        let mut state = RunState::new("plan", &PipelineOptions::default(), cancel);
        obs::emit_run_started(&state.run_id(), "plan");
        let span = RunSpan::new(&state.run_id());
        span.wrap(async move {
            let result = self.drive_plan(&mut state, request).await;
            state.finish(result)
        })
        .await
    }

    /// Generate and validate a manifest without rendering it.
    pub async fn synthesize(
        &self,
        request: &PlanRequest,
        options: &PipelineOptions,
        cancel: Option<CancelSignal>,
    ) -> PipelineOutcome {
        self.generated("synthesize", request, options, cancel, false)
            .await
    }

    /// Generate, validate and render a manifest.
    pub async fn render(
        &self,
        request: &PlanRequest,
        options: &PipelineOptions,
        cancel: Option<CancelSignal>,
    ) -> PipelineOutcome {
        self.generated("render", request, options, cancel, true).await
    }

    /// Validate and render an existing manifest.
    pub async fn execute(
        &self,
        manifest: &Path,
        options: &PipelineOptions,
        cancel: Option<CancelSignal>,
    ) -> PipelineOutcome {
        let output = options
            .output
            .clone()
            .unwrap_or_else(|| default_output(manifest, "mov", None));
        let command = |manifest: PathBuf, output: PathBuf| RenderCommand::Build {
            manifest,
            output,
            backend: options.backend,
        };
        self.existing("execute", manifest, output, command, options, cancel)
            .await
    }

    /// Validate an existing manifest and render one frame of it.
    pub async fn render_frame(
        &self,
        manifest: &Path,
        frame: u32,
        options: &PipelineOptions,
        cancel: Option<CancelSignal>,
    ) -> PipelineOutcome {
        let output = options
            .output
            .clone()
            .unwrap_or_else(|| default_output(manifest, "png", Some(frame)));
        let command = |manifest: PathBuf, output: PathBuf| RenderCommand::RenderFrame {
            manifest,
            frame,
            output,
            backend: options.backend,
        };
        self.existing("render-frame", manifest, output, command, options, cancel)
            .await
    }

    async fn generated(
        &self,
        pipeline: &str,
        request: &PlanRequest,
        options: &PipelineOptions,
        cancel: Option<CancelSignal>,
        build: bool,
    ) -> PipelineOutcome {
        let mut state = RunState::new(pipeline, options, cancel);
        obs::emit_run_started(&state.run_id(), pipeline);
        let span = RunSpan::new(&state.run_id());
        span.wrap(async move {
            let result = self
                .drive_generated(&mut state, request, options, build)
                .await;
            state.finish(result)
        })
        .await
    }

    async fn existing<F>(
        &self,
        pipeline: &str,
        manifest: &Path,
        output: PathBuf,
        command: F,
        options: &PipelineOptions,
        cancel: Option<CancelSignal>,
    ) -> PipelineOutcome
    where
        F: FnOnce(PathBuf, PathBuf) -> RenderCommand + Send,
    {
        let mut state = RunState::new(pipeline, options, cancel);
        obs::emit_run_started(&state.run_id(), pipeline);
        let span = RunSpan::new(&state.run_id());
        span.wrap(async move {
            let result = self
                .drive_existing(&mut state, manifest, output, command, options)
                .await;
            state.finish(result)
        })
        .await
    }

    async fn drive_plan(&self, state: &mut RunState, request: &PlanRequest) -> Result<()> {
        let mut response =
            PlanResponse::synthesize(request).map_err(PipelineError::SchemaInvalid)?;
        state.run.log("Render plan synthesized.");

        if let Some(manifest) = &request.manifest_path {
            state.plan = Some(response.clone());
            state.advance(Stage::ValidatingSchema)?;
            let command = RenderCommand::Check {
                manifest: manifest.clone(),
            };
            let inv = self.run_tool(state, &command, self.timeouts.check).await?;
            response.record_manifest_check(inv.success(), &inv.combined_output());
            state
                .run
                .log(format!("Manifest check: {}", if inv.success() { "PASSED" } else { "FAILED" }));
        }

        state.plan = Some(response);
        state.advance(Stage::Complete)
    }

    async fn drive_generated(
        &self,
        state: &mut RunState,
        request: &PlanRequest,
        options: &PipelineOptions,
        build: bool,
    ) -> Result<()> {
        // Overrides are validated before anything runs
        let plan = PlanResponse::synthesize(request).map_err(PipelineError::SchemaInvalid)?;
        let stem = output_stem(&request.prompt);
        let output = self.paths.resolve(
            &options
                .output
                .clone()
                .unwrap_or_else(|| PathBuf::from(format!("renders/{stem}.mov"))),
        );
        let manifest_path = manifest_for_output(&output);
        let backend = options.backend.or(Some(plan.render_plan.backend()));
        let render_plan = plan.render_plan.clone();
        state.plan = Some(plan);

        // GatheringContext
        state.advance(Stage::GatheringContext)?;
        let context = self.gather_context(state, options).await?;

        // InvokingModel
        state.advance(Stage::InvokingModel)?;
        let user = user_message(&context, &request.prompt, &render_plan);
        let completion = self.invoke_model(state, &user).await?;

        // ExtractingArtifact
        state.advance(Stage::ExtractingArtifact)?;
        let extraction = extract_manifest(&completion);
        if extraction.is_empty() {
            return Err(PipelineError::ExtractionEmpty);
        }
        state.run.log(format!(
            "Extracted manifest ({} bytes, {:?}).",
            extraction.text.len(),
            extraction.method
        ));
        let artifact = ManifestArtifact::new(extraction.text).at_path(&manifest_path);

        // ValidatingSchema
        state.advance(Stage::ValidatingSchema)?;
        write_manifest(&manifest_path, artifact.raw_text()).await?;
        state
            .run
            .log(format!("Manifest written to {}", manifest_path.display()));
        let artifact = self.check_schema(state, artifact).await?;
        let artifact = self.lint(state, artifact, options).await?;

        if !build {
            state.artifact = Some(artifact);
            return state.advance(Stage::Complete);
        }

        let command = RenderCommand::Build {
            manifest: manifest_path,
            output: output.clone(),
            backend,
        };
        self.build(state, artifact, command, self.timeouts.build).await
    }

    async fn drive_existing<F>(
        &self,
        state: &mut RunState,
        manifest: &Path,
        output: PathBuf,
        command: F,
        options: &PipelineOptions,
    ) -> Result<()>
    where
        F: FnOnce(PathBuf, PathBuf) -> RenderCommand,
    {
        let manifest = self.paths.resolve(manifest);
        let output = self.paths.resolve(&output);

        state.advance(Stage::ValidatingSchema)?;
        if output == manifest {
            let clash = std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("output {} would overwrite the manifest", output.display()),
            );
            return Err(PipelineError::io(state.run.stage.failure_stage(), clash));
        }

        let text = tokio::fs::read_to_string(&manifest)
            .await
            .map_err(|e| PipelineError::io(state.run.stage.failure_stage(), e))?;
        let artifact = ManifestArtifact::from_file(&manifest, text);

        let artifact = self.check_schema(state, artifact).await?;
        let artifact = self.lint(state, artifact, options).await?;

        let command = command(manifest, output);
        let own = self.timeouts.for_command(&command);
        self.build(state, artifact, command, own).await
    }

    async fn gather_context(&self, state: &mut RunState, options: &PipelineOptions) -> Result<String> {
        let fetch = self.context.fetch(options.context_keys.as_deref());
        let bundle = tokio::select! {
            bundle = fetch => bundle,
            _ = wait_cancelled(state.cancel.clone()) => return Err(state.cancelled()),
        };

        if let Some(reason) = &bundle.diagnostic {
            let degraded = PipelineError::ContextUnavailable(reason.clone());
            obs::emit_degraded(&state.run_id(), Stage::GatheringContext, &degraded);
            state.run.warn(degraded.to_string());
        } else if bundle.is_empty() {
            state.run.log("No context available; continuing without it.");
        } else {
            state
                .run
                .log(format!("Loaded {} context snippet(s).", bundle.len()));
        }
        Ok(bundle.render())
    }

    async fn invoke_model(&self, state: &mut RunState, user: &str) -> Result<String> {
        let exhausted = PipelineError::ModelTimeout {
            timeout: state.deadline.limit(),
        };

        let budget = state.deadline.budget(self.chat_timeout).ok_or(exhausted)?;
        let resolve = tokio::time::timeout(budget, self.model.resolve_model());
        let model = tokio::select! {
            resolved = resolve => resolved.unwrap_or_else(|_| {
                debug!("Model resolution timed out; using fallback id");
                FALLBACK_MODEL.to_string()
            }),
            _ = wait_cancelled(state.cancel.clone()) => return Err(state.cancelled()),
        };
        state.run.log(format!("Thinking... (model: {model})"));

        let request = ChatRequest::new(model, SYSTEM_PROMPT, user);
        let budget = state
            .deadline
            .budget(self.chat_timeout)
            .ok_or(PipelineError::ModelTimeout {
                timeout: state.deadline.limit(),
            })?;
        let call = tokio::time::timeout(budget, self.model.complete(&request, budget));
        let completion = tokio::select! {
            result = call => match result {
                Ok(result) => result?,
                Err(_) => return Err(PipelineError::ModelTimeout { timeout: budget }),
            },
            _ = wait_cancelled(state.cancel.clone()) => return Err(state.cancelled()),
        };
        state.run.log("Model responded.");
        Ok(completion)
    }

    /// Mandatory schema gate.
    async fn check_schema(
        &self,
        state: &mut RunState,
        artifact: ManifestArtifact,
    ) -> Result<ManifestArtifact> {
        let Some(manifest) = artifact.source_path().map(Path::to_path_buf) else {
            let missing = std::io::Error::new(std::io::ErrorKind::NotFound, "manifest has no path");
            return Err(PipelineError::io(state.run.stage.failure_stage(), missing));
        };
        let command = RenderCommand::Check { manifest };
        let inv = self.run_tool(state, &command, self.timeouts.check).await?;

        if inv.success() {
            state.run.log("Schema check passed.");
            Ok(artifact.mark_schema_ok()?)
        } else {
            state.artifact = Some(artifact.mark_schema_failed()?);
            Err(PipelineError::SchemaRejected {
                exit_code: inv.exit_code,
                diagnostics: inv.combined_output(),
            })
        }
    }

    /// Advisory lint pass. Warnings downgrade the artifact, never abort.
    async fn lint(
        &self,
        state: &mut RunState,
        artifact: ManifestArtifact,
        options: &PipelineOptions,
    ) -> Result<ManifestArtifact> {
        if !options.lint {
            state.run.log("Lint skipped.");
            return Ok(artifact);
        }
        state.advance(Stage::LintingOptional)?;

        let Some(manifest) = artifact.source_path().map(Path::to_path_buf) else {
            return Ok(artifact);
        };
        let command = RenderCommand::Lint { manifest };
        match self.run_tool(state, &command, self.timeouts.lint).await {
            Ok(inv) if inv.success() => {
                state.run.log("Lint clean.");
                Ok(artifact)
            }
            Ok(inv) => {
                let warning = PipelineError::LintWarning(inv.combined_output());
                obs::emit_degraded(&state.run_id(), Stage::LintingOptional, &warning);
                state.run.warn(warning.to_string());
                Ok(artifact.mark_lint_warned()?)
            }
            Err(e @ PipelineError::Cancelled { .. }) => Err(e),
            Err(e @ PipelineError::ToolNotFound(_)) => Err(e),
            Err(e) => {
                state.run.warn(format!("lint did not complete: {e}"));
                Ok(artifact)
            }
        }
    }

    async fn build(
        &self,
        state: &mut RunState,
        artifact: ManifestArtifact,
        command: RenderCommand,
        own: Duration,
    ) -> Result<()> {
        if !artifact.is_buildable() {
            return Err(TransitionError {
                from: state.run.stage.to_string(),
                to: Stage::Building.to_string(),
                stage: state.run.stage,
            }
            .into());
        }
        state.artifact = Some(artifact);
        state.advance(Stage::Building)?;

        let inv = self.run_tool(state, &command, own).await?;
        let lines = progress_lines(&inv.stderr);
        let last = lines.iter().rev().find_map(|l| parse_frame_progress(l));
        for line in lines {
            state.run.log(line);
        }
        if let Some(progress) = last {
            debug!(current = progress.current, total = progress.total, "Build progress");
            state.run.log(format!(
                "Frames rendered: {}/{} ({:.0}%)",
                progress.current,
                progress.total,
                progress.fraction() * 100.0
            ));
        }
        if !inv.success() {
            let stderr = inv.stderr.trim();
            return Err(PipelineError::BuildFailed {
                exit_code: inv.exit_code,
                stderr: if stderr.is_empty() {
                    inv.combined_output()
                } else {
                    stderr.to_string()
                },
            });
        }

        let output = command
            .output()
            .map(|p| self.paths.resolve(p))
            .unwrap_or_default();
        if !tokio::fs::try_exists(&output).await.unwrap_or(false) {
            return Err(PipelineError::OutputMissing { path: output });
        }
        state
            .run
            .log(format!("Render complete: {}", output.display()));
        state.output = Some(output);
        state.advance(Stage::Complete)
    }

    /// Run one tool command under the run's deadline and cancellation.
    async fn run_tool(
        &self,
        state: &RunState,
        command: &RenderCommand,
        own: Duration,
    ) -> Result<ToolInvocation> {
        let stage = state.run.stage.failure_stage();
        let tool = self.tool()?;
        let timeout = state
            .deadline
            .budget(own)
            .ok_or_else(|| PipelineError::ToolTimeout {
                stage,
                command: command.display_with("vcr"),
                timeout: state.deadline.limit(),
            })?;
        tool.run(command, timeout, state.cancel.clone())
            .await
            .map_err(|e| PipelineError::from_tool(stage, e))
    }
}

async fn write_manifest(path: &Path, text: &str) -> Result<()> {
    let stage = Stage::ValidatingSchema.failure_stage();
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| PipelineError::io(stage, e))?;
    }
    tokio::fs::write(path, text)
        .await
        .map_err(|e| PipelineError::io(stage, e))
}

/// The manifest written next to `output`.
///
/// An output that is itself a `.vcr` file gets a distinct `.manifest.vcr`
/// sibling so the build never overwrites its own input.
fn manifest_for_output(output: &Path) -> PathBuf {
    if output.extension().is_some_and(|ext| ext == "vcr") {
        output.with_extension("manifest.vcr")
    } else {
        output.with_extension("vcr")
    }
}

/// `renders/<manifest stem>.<ext>`, with `_frame<N>` for single frames.
fn default_output(manifest: &Path, ext: &str, frame: Option<u32>) -> PathBuf {
    let stem = manifest
        .file_stem()
        .map(|s| output_stem(&s.to_string_lossy()))
        .unwrap_or_else(|| output_stem(""));
    let name = match frame {
        Some(n) => format!("{stem}_frame{n}.{ext}"),
        None => format!("{stem}.{ext}"),
    };
    PathBuf::from("renders").join(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_never_aliases_output() {
        assert_eq!(
            manifest_for_output(Path::new("out/final.mov")),
            PathBuf::from("out/final.vcr")
        );
        assert_eq!(
            manifest_for_output(Path::new("scene.vcr")),
            PathBuf::from("scene.manifest.vcr")
        );
        assert_eq!(manifest_for_output(Path::new("clip")), PathBuf::from("clip.vcr"));
    }

    #[test]
    fn test_default_output_names() {
        assert_eq!(
            default_output(Path::new("scenes/Intro Card.vcr"), "mov", None),
            PathBuf::from("renders/intro_card.mov")
        );
        assert_eq!(
            default_output(Path::new("x.vcr"), "png", Some(12)),
            PathBuf::from("renders/x_frame12.png")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_budget() {
        let unbounded = Deadline::start(None);
        assert_eq!(unbounded.budget(Duration::from_secs(90)), Some(Duration::from_secs(90)));

        let bounded = Deadline::start(Some(Duration::from_secs(10)));
        assert_eq!(bounded.budget(Duration::from_secs(90)), Some(Duration::from_secs(10)));
        assert_eq!(bounded.budget(Duration::from_secs(3)), Some(Duration::from_secs(3)));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(bounded.budget(Duration::from_secs(3)), None);
    }

    #[test]
    fn test_default_options_lint() {
        assert!(PipelineOptions::default().lint);
    }
}

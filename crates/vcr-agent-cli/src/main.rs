//! VCR Agent CLI
//!
//! The `vcr-agent` command drives the VCR render tool on behalf of a calling
//! agent. Results go to stdout as pretty JSON; logs go to stderr.
//!
//! ## Commands
//!
//! - `doctor`: Check the render tool and the agent's configuration
//! - `lint`: Advisory lint of a manifest file or stdin
//! - `plan`: Synthesize a structured render plan
//! - `validate-plan`: Validate a plan document, optionally against the tool
//! - `synthesize` / `render`: Generate a manifest from a prompt (and render it)
//! - `execute` / `render-frame`: Render an existing manifest

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tokio::io::AsyncReadExt;
use tracing::{info, warn, Level};

use vcr_agent_core::plan::referenced_manifests;
use vcr_agent_core::{
    init_tracing, validate_document, validate_live, AgentConfig, ContextRetriever, DocumentReport,
    OpenAiCompatClient, Orchestrator, PipelineOptions, PipelineOutcome, PlanRequest,
};
use vcr_tool::{
    lint_manifest_text, Backend, CancelHandle, CancelSignal, ProcessRunner, RenderCommand,
    ToolInvocation, ToolRunner,
};

/// Exit code for a plan document that failed structural validation.
const EXIT_SCHEMA: u8 = 1;
/// Exit code for a plan document whose manifests failed `vcr check`.
const EXIT_LIVE: u8 = 2;

#[derive(Parser)]
#[command(name = "vcr-agent")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Agent-facing orchestration for the VCR render tool", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Skip the advisory lint pass
    #[arg(long, global = true)]
    no_lint: bool,

    /// Render backend passed through to the tool
    #[arg(long, global = true)]
    backend: Option<Backend>,

    /// Output file (the manifest is written alongside as .vcr)
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    /// Overall wall-clock budget for a pipeline run, in seconds
    #[arg(long, global = true, env = "VCR_DEADLINE_SECS")]
    deadline_secs: Option<u64>,

    /// Context store key to include (repeatable; default samples the store)
    #[arg(long = "context-key", global = true)]
    context_keys: Vec<String>,

    /// LLM endpoint (overrides VCR_LLM_ENDPOINT)
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Model id (overrides VCR_LLM_MODEL)
    #[arg(long, global = true)]
    model: Option<String>,

    /// Render tool name or path (overrides VCR_BINARY)
    #[arg(long, global = true)]
    binary: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the render tool and report the agent's configuration
    Doctor,

    /// Lint a manifest (advisory; nonzero exit on warnings)
    Lint {
        /// Manifest file, or `-` for stdin
        file: String,
    },

    /// Synthesize a structured render plan without rendering
    Plan {
        #[command(flatten)]
        request: PlanArgs,

        /// Existing manifest to check and reference in the commands
        #[arg(long)]
        manifest: Option<PathBuf>,
    },

    /// Validate a plan document
    ValidatePlan {
        /// Plan document, or `-` for stdin
        file: String,

        /// Also run `vcr check` on every manifest the document references
        #[arg(long)]
        live: bool,
    },

    /// Generate and validate a manifest from a prompt
    Synthesize {
        #[command(flatten)]
        request: PlanArgs,
    },

    /// Generate, validate and render a manifest from a prompt
    Render {
        #[command(flatten)]
        request: PlanArgs,
    },

    /// Validate and render an existing manifest
    Execute {
        /// Manifest path
        manifest: PathBuf,
    },

    /// Validate an existing manifest and render one frame
    RenderFrame {
        /// Manifest path
        manifest: PathBuf,

        /// Frame index
        #[arg(long)]
        frame: u32,
    },
}

#[derive(Args, Debug, Clone)]
struct PlanArgs {
    /// What to render, in plain language
    prompt: String,

    /// Output resolution as WIDTHxHEIGHT
    #[arg(long)]
    resolution: Option<String>,

    /// Frames per second
    #[arg(long)]
    fps: Option<u32>,

    /// Duration in seconds
    #[arg(long)]
    duration: Option<f64>,

    /// Render with an alpha channel
    #[arg(long)]
    alpha: bool,
}

impl PlanArgs {
    fn to_request(&self, backend: Option<Backend>) -> PlanRequest {
        PlanRequest {
            resolution: self.resolution.clone(),
            fps: self.fps,
            duration: self.duration,
            alpha: self.alpha.then_some(true),
            backend: backend.map(|b| b.to_string()),
            ..PlanRequest::new(self.prompt.clone())
        }
    }
}

impl Cli {
    /// Layer flag overrides over the environment-derived configuration.
    fn apply(&self, config: &mut AgentConfig) {
        if let Some(endpoint) = &self.endpoint {
            config.llm = config.llm.clone().with_endpoint(endpoint);
        }
        if let Some(model) = &self.model {
            config.llm.model = Some(model.clone());
        }
        if let Some(binary) = &self.binary {
            config.paths.binary = binary.clone();
        }
    }

    fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            lint: !self.no_lint,
            backend: self.backend,
            output: self.output.clone(),
            deadline: self.deadline_secs.map(Duration::from_secs),
            context_keys: (!self.context_keys.is_empty()).then(|| self.context_keys.clone()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    let mut config = AgentConfig::from_env().context("Failed to load configuration")?;
    cli.apply(&mut config);
    let options = cli.pipeline_options();

    match &cli.command {
        Commands::Doctor => cmd_doctor(&config).await,
        Commands::Lint { file } => cmd_lint(&config, file).await,
        Commands::Plan { request, manifest } => {
            let mut request = request.to_request(cli.backend);
            request.manifest_path = manifest.clone();
            cmd_plan(&config, &request).await
        }
        Commands::ValidatePlan { file, live } => cmd_validate_plan(&config, file, *live).await,
        Commands::Synthesize { request } => {
            let orchestrator = orchestrator(&config, true).await?;
            let request = request.to_request(cli.backend);
            let outcome = orchestrator
                .synthesize(&request, &options, Some(cancel_on_ctrl_c()))
                .await;
            report_outcome(&outcome)
        }
        Commands::Render { request } => {
            let orchestrator = orchestrator(&config, true).await?;
            let request = request.to_request(cli.backend);
            let outcome = orchestrator
                .render(&request, &options, Some(cancel_on_ctrl_c()))
                .await;
            report_outcome(&outcome)
        }
        Commands::Execute { manifest } => {
            let orchestrator = orchestrator(&config, true).await?;
            let outcome = orchestrator
                .execute(manifest, &options, Some(cancel_on_ctrl_c()))
                .await;
            report_outcome(&outcome)
        }
        Commands::RenderFrame { manifest, frame } => {
            let orchestrator = orchestrator(&config, true).await?;
            let outcome = orchestrator
                .render_frame(manifest, *frame, &options, Some(cancel_on_ctrl_c()))
                .await;
            report_outcome(&outcome)
        }
    }
}

/// Resolve the render tool once, before any run starts.
fn locate_tool(config: &AgentConfig) -> Result<ProcessRunner> {
    ProcessRunner::locate(&config.paths.binary, &config.paths.project_root)
        .context("Render tool not available")
}

/// Wire the orchestrator. With `needs_tool`, a missing binary is fatal here.
async fn orchestrator(config: &AgentConfig, needs_tool: bool) -> Result<Orchestrator> {
    let context = ContextRetriever::open(&config.paths.context_store).await;
    let model = Arc::new(
        OpenAiCompatClient::new(config.llm.clone()).context("Failed to build LLM client")?,
    );

    match ProcessRunner::locate(&config.paths.binary, &config.paths.project_root) {
        Ok(runner) => Ok(Orchestrator::new(config, context, model, Arc::new(runner))),
        Err(e) if !needs_tool => {
            warn!(error = %e, "Render tool not found; manifest checks unavailable");
            Ok(Orchestrator::without_tool(config, context, model, e.to_string()))
        }
        Err(e) => Err(e).context("Render tool not available"),
    }
}

/// Cancel the returned signal on Ctrl-C.
fn cancel_on_ctrl_c() -> CancelSignal {
    let handle = CancelHandle::new();
    let signal = handle.signal();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; cancelling run");
            handle.cancel();
        }
    });
    signal
}

async fn read_input(file: &str) -> Result<String> {
    if file == "-" {
        let mut text = String::new();
        tokio::io::stdin()
            .read_to_string(&mut text)
            .await
            .context("Failed to read stdin")?;
        Ok(text)
    } else {
        tokio::fs::read_to_string(file)
            .await
            .with_context(|| format!("Failed to read {file}"))
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn report_outcome(outcome: &PipelineOutcome) -> Result<ExitCode> {
    print_json(outcome)?;
    Ok(if outcome.succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

#[derive(Serialize)]
struct DoctorReport {
    healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    binary: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool: Option<ToolInvocation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    project_root: PathBuf,
    llm_endpoint: String,
    llm_model: Option<String>,
    context_store: PathBuf,
    context_store_present: bool,
}

async fn cmd_doctor(config: &AgentConfig) -> Result<ExitCode> {
    let mut report = DoctorReport {
        healthy: false,
        binary: None,
        tool: None,
        error: None,
        project_root: config.paths.project_root.clone(),
        llm_endpoint: config.llm.endpoint.clone(),
        llm_model: config.llm.model.clone(),
        context_store: config.paths.context_store.clone(),
        context_store_present: config.paths.context_store.exists(),
    };

    match locate_tool(config) {
        Ok(runner) => {
            report.binary = Some(runner.invoker().program().to_path_buf());
            let timeout = config.tools.doctor;
            let result =
                tokio::task::spawn_blocking(move || runner.run_blocking(&RenderCommand::Doctor, timeout))
                    .await
                    .context("doctor task panicked")?;
            match result {
                Ok(inv) => {
                    report.healthy = inv.success();
                    report.tool = Some(inv);
                }
                Err(e) => report.error = Some(e.to_string()),
            }
        }
        Err(e) => report.error = Some(format!("{e:#}")),
    }

    info!(healthy = report.healthy, "Doctor finished");
    print_json(&report)?;
    Ok(if report.healthy {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

#[derive(Serialize)]
struct LintReport {
    clean: bool,
    exit_code: i32,
    diagnostics: String,
}

async fn cmd_lint(config: &AgentConfig, file: &str) -> Result<ExitCode> {
    let runner = locate_tool(config)?;
    let timeout = config.tools.lint;

    let inv = if file == "-" {
        let text = read_input(file).await?;
        lint_manifest_text(&runner, &text, timeout).await?
    } else {
        let command = RenderCommand::Lint {
            manifest: PathBuf::from(file),
        };
        runner.run(&command, timeout, None).await?
    };

    let report = LintReport {
        clean: inv.success(),
        exit_code: inv.exit_code,
        diagnostics: inv.combined_output(),
    };
    print_json(&report)?;
    Ok(if report.clean {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn cmd_plan(config: &AgentConfig, request: &PlanRequest) -> Result<ExitCode> {
    let orchestrator = orchestrator(config, false).await?;
    let outcome = orchestrator.plan(request, None).await;
    match (&outcome.plan, outcome.succeeded()) {
        (Some(plan), true) => {
            print_json(plan)?;
            Ok(ExitCode::SUCCESS)
        }
        _ => report_outcome(&outcome),
    }
}

#[derive(Serialize)]
struct PlanValidation {
    status: &'static str,
    #[serde(flatten)]
    report: DocumentReport,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    live_errors: Vec<String>,
}

async fn cmd_validate_plan(config: &AgentConfig, file: &str, live: bool) -> Result<ExitCode> {
    let text = read_input(file).await?;
    let report = validate_document(&text);

    if !report.passed() {
        print_json(&PlanValidation {
            status: "FAILED",
            report,
            live_errors: Vec::new(),
        })?;
        return Ok(ExitCode::from(EXIT_SCHEMA));
    }

    let mut live_errors = Vec::new();
    if live {
        let manifests = referenced_manifests(&text).unwrap_or_default();
        info!(count = manifests.len(), "Live-checking referenced manifests");
        match locate_tool(config) {
            Ok(runner) => {
                live_errors = validate_live(&text, &runner, config.tools.check).await;
            }
            Err(e) => live_errors.push(format!("{e:#}")),
        }
    }

    let failed_live = !live_errors.is_empty();
    print_json(&PlanValidation {
        status: if failed_live { "LIVE_FAILED" } else { "PASSED" },
        report,
        live_errors,
    })?;
    Ok(if failed_live {
        ExitCode::from(EXIT_LIVE)
    } else {
        ExitCode::SUCCESS
    })
}

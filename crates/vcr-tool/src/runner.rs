//! The render-tool seam used by the orchestrator.
//!
//! `ProcessRunner` drives the real binary; `fakes::RecordingToolRunner`
//! stands in for it in tests.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::instrument;

use crate::cancel::CancelSignal;
use crate::commands::RenderCommand;
use crate::error::ToolError;
use crate::invoker::{Invoker, ToolInvocation};
use crate::locate::locate_binary;
use crate::ToolResult;

/// Executes render-tool subcommands.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Directory the tool runs in; relative paths resolve against it.
    fn working_dir(&self) -> &Path;

    /// Run one subcommand under `timeout`, honoring `cancel`.
    async fn run(
        &self,
        command: &RenderCommand,
        timeout: Duration,
        cancel: Option<CancelSignal>,
    ) -> ToolResult<ToolInvocation>;
}

/// Runs the resolved `vcr` binary as a child process.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    invoker: Invoker,
}

impl ProcessRunner {
    /// Resolve `binary` (see [`crate::locate`]) and root it at `project_root`.
    pub fn locate(binary: &str, project_root: &Path) -> ToolResult<Self> {
        let program = locate_binary(binary, project_root)?;
        Ok(Self::new(program, project_root))
    }

    pub fn new(program: impl Into<PathBuf>, project_root: impl Into<PathBuf>) -> Self {
        Self {
            invoker: Invoker::new(program, project_root),
        }
    }

    pub fn invoker(&self) -> &Invoker {
        &self.invoker
    }

    /// Blocking variant of [`ToolRunner::run`], for synchronous callers.
    pub fn run_blocking(
        &self,
        command: &RenderCommand,
        timeout: Duration,
    ) -> ToolResult<ToolInvocation> {
        self.invoker.run_blocking(&command.args(), timeout)
    }
}

#[async_trait]
impl ToolRunner for ProcessRunner {
    fn working_dir(&self) -> &Path {
        self.invoker.working_dir()
    }

    #[instrument(skip(self, cancel), fields(subcommand = command.subcommand()))]
    async fn run(
        &self,
        command: &RenderCommand,
        timeout: Duration,
        cancel: Option<CancelSignal>,
    ) -> ToolResult<ToolInvocation> {
        self.invoker.run(&command.args(), timeout, cancel).await
    }
}

/// Lint manifest text that does not live on disk yet.
///
/// Writes `manifest_text` to a uniquely named `.vcr` file under the runner's
/// working directory, lints it, and removes the file again.
pub async fn lint_manifest_text(
    runner: &dyn ToolRunner,
    manifest_text: &str,
    timeout: Duration,
) -> ToolResult<ToolInvocation> {
    let file = tempfile::Builder::new()
        .prefix(".vcr-lint-")
        .suffix(".vcr")
        .tempfile_in(runner.working_dir())
        .map_err(ToolError::Io)?;
    tokio::fs::write(file.path(), manifest_text).await?;

    let command = RenderCommand::Lint {
        manifest: file.path().to_path_buf(),
    };
    // `file` is removed on drop, after the lint finished
    runner.run(&command, timeout, None).await
}

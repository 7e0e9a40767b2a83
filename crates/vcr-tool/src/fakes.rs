//! In-memory render tool for tests.
//!
//! `RecordingToolRunner` never spawns a process. Each subcommand answers
//! with a scripted [`FakeResponse`]; every call is recorded so tests can
//! assert what was (and was not) issued.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::cancel::{wait_cancelled, CancelSignal};
use crate::commands::RenderCommand;
use crate::error::ToolError;
use crate::invoker::ToolInvocation;
use crate::runner::ToolRunner;
use crate::ToolResult;

/// Scripted behaviour of one subcommand.
#[derive(Debug, Clone, Default)]
pub struct FakeResponse {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// Write the command's declared output file before returning.
    pub create_output: bool,
    /// Simulated run time; compared against the timeout.
    pub delay: Duration,
}

impl FakeResponse {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn exit(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: code,
            stderr: stderr.into(),
            ..Self::default()
        }
    }

    pub fn producing_output(mut self) -> Self {
        self.create_output = true;
        self
    }

    pub fn with_stdout(mut self, stdout: impl Into<String>) -> Self {
        self.stdout = stdout.into();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Fake [`ToolRunner`] that records each command it receives.
#[derive(Debug)]
pub struct RecordingToolRunner {
    working_dir: PathBuf,
    responses: Mutex<HashMap<&'static str, FakeResponse>>,
    calls: Mutex<Vec<RenderCommand>>,
}

impl RecordingToolRunner {
    /// Every subcommand succeeds; `build` and `render-frame` write their output.
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        let mut responses = HashMap::new();
        for name in ["doctor", "check", "lint"] {
            responses.insert(name, FakeResponse::ok());
        }
        responses.insert("build", FakeResponse::ok().producing_output());
        responses.insert("render-frame", FakeResponse::ok().producing_output());
        Self {
            working_dir: working_dir.into(),
            responses: Mutex::new(responses),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Override the response for one subcommand (`"check"`, `"build"`, ...).
    pub fn respond(self, subcommand: &'static str, response: FakeResponse) -> Self {
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(subcommand, response);
        self
    }

    /// Commands received so far, in order.
    pub fn calls(&self) -> Vec<RenderCommand> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Subcommand names received so far, in order.
    pub fn subcommands(&self) -> Vec<&'static str> {
        self.calls().iter().map(RenderCommand::subcommand).collect()
    }

    pub fn was_issued(&self, subcommand: &str) -> bool {
        self.subcommands().iter().any(|s| *s == subcommand)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.working_dir.join(path)
        }
    }
}

#[async_trait]
impl ToolRunner for RecordingToolRunner {
    fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    async fn run(
        &self,
        command: &RenderCommand,
        timeout: Duration,
        cancel: Option<CancelSignal>,
    ) -> ToolResult<ToolInvocation> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(command.clone());
        let response = self
            .responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(command.subcommand())
            .cloned()
            .unwrap_or_default();
        let command_line = command.display_with("vcr");

        if !response.delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(response.delay.min(timeout)) => {}
                _ = wait_cancelled(cancel) => {
                    return Err(ToolError::Cancelled { command: command_line });
                }
            }
        }
        if response.delay > timeout {
            return Err(ToolError::Timeout {
                command: command_line,
                timeout,
            });
        }

        if response.create_output && response.exit_code == 0 {
            if let Some(output) = command.output() {
                let output = self.resolve(output);
                if let Some(parent) = output.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&output, b"fake render output").await?;
            }
        }

        let mut argv = vec!["vcr".to_string()];
        argv.extend(command.args());
        Ok(ToolInvocation {
            command: argv,
            working_dir: self.working_dir.clone(),
            timeout,
            stdout: response.stdout,
            stderr: response.stderr,
            exit_code: response.exit_code,
            duration_ms: response.delay.min(timeout).as_millis() as u64,
        })
    }
}

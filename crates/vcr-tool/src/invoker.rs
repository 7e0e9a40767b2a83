//! Process execution with captured stdio and hard deadlines.
//!
//! Two modes:
//! - [`Invoker::run_blocking`] suspends the calling thread until exit or
//!   timeout.
//! - [`Invoker::run`] suspends the calling task and can also be cancelled
//!   through a [`CancelSignal`].
//!
//! In both modes the child runs in its own process group. When a run ends,
//! for any reason, the whole group is killed and the child reaped before
//! returning, so no descendant is left running in the background.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, warn};

use crate::cancel::{wait_cancelled, CancelSignal};
use crate::error::ToolError;
use crate::ToolResult;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long to wait for stdio readers after the process is gone.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Record of one finished process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Program followed by its arguments.
    pub command: Vec<String>,
    pub working_dir: PathBuf,
    pub timeout: Duration,
    pub stdout: String,
    pub stderr: String,
    /// Exit code; `-1` when the process was terminated by a signal.
    pub exit_code: i32,
    pub duration_ms: u64,
}

impl ToolInvocation {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stdout followed by stderr, trimmed.
    pub fn combined_output(&self) -> String {
        format!("{}{}", self.stdout, self.stderr).trim().to_string()
    }
}

/// Runs one program from a fixed working directory.
#[derive(Debug, Clone)]
pub struct Invoker {
    program: PathBuf,
    working_dir: PathBuf,
}

impl Invoker {
    pub fn new(program: impl Into<PathBuf>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            working_dir: working_dir.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    fn command_vec(&self, args: &[String]) -> Vec<String> {
        std::iter::once(self.program.to_string_lossy().into_owned())
            .chain(args.iter().cloned())
            .collect()
    }

    /// Run to completion on the current thread.
    ///
    /// Never blocks past `timeout` plus a short drain window, even when a
    /// descendant inherited the output pipes.
    pub fn run_blocking(&self, args: &[String], timeout: Duration) -> ToolResult<ToolInvocation> {
        let command = self.command_vec(args);
        info!(event = "tool.invoked", command = %command.join(" "), mode = "blocking");

        let mut cmd = std::process::Command::new(&self.program);
        cmd.args(args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        std::os::unix::process::CommandExt::process_group(&mut cmd, 0);
        let mut child = cmd.spawn().map_err(|source| ToolError::Spawn {
            program: self.program.display().to_string(),
            source,
        })?;
        let pid = child.id();

        // Drain pipes on their own threads so a chatty child cannot block on a full pipe
        let stdout_reader = child.stdout.take().map(spawn_reader);
        let stderr_reader = child.stderr.take().map(spawn_reader);

        let started = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if started.elapsed() >= timeout {
                kill_group(pid);
                // kill() fails only if the child already exited; wait() reaps either way
                let _ = child.kill();
                child.wait()?;
                warn!(event = "tool.timed_out", command = %command.join(" "), timeout_ms = timeout.as_millis() as u64);
                return Err(ToolError::Timeout {
                    command: command.join(" "),
                    timeout,
                });
            }
            std::thread::sleep(POLL_INTERVAL);
        };
        // Descendants may still hold the pipes open
        kill_group(pid);

        let drain_until = Instant::now() + DRAIN_GRACE;
        let stdout = stdout_reader
            .map(|r| join_reader(r, drain_until))
            .unwrap_or_default();
        let stderr = stderr_reader
            .map(|r| join_reader(r, drain_until))
            .unwrap_or_default();

        Ok(self.finish(command, timeout, status, stdout, stderr, started))
    }

    /// Run to completion without blocking the executor.
    ///
    /// Returns `ToolError::Timeout` or `ToolError::Cancelled` only after the
    /// child has been killed and reaped.
    pub async fn run(
        &self,
        args: &[String],
        timeout: Duration,
        cancel: Option<CancelSignal>,
    ) -> ToolResult<ToolInvocation> {
        let command = self.command_vec(args);
        info!(event = "tool.invoked", command = %command.join(" "), mode = "async");

        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        let mut child = cmd.spawn().map_err(|source| ToolError::Spawn {
            program: self.program.display().to_string(),
            source,
        })?;
        let pid = child.id().unwrap_or_default();

        let stdout_task = child.stdout.take().map(|s| tokio::spawn(read_async(s)));
        let stderr_task = child.stderr.take().map(|s| tokio::spawn(read_async(s)));

        let started = Instant::now();
        let outcome = tokio::select! {
            status = child.wait() => Outcome::Exited(status?),
            _ = tokio::time::sleep(timeout) => Outcome::TimedOut,
            _ = wait_cancelled(cancel) => Outcome::Cancelled,
        };

        let timed_out = matches!(outcome, Outcome::TimedOut);
        let status = match outcome {
            Outcome::Exited(status) => status,
            Outcome::TimedOut | Outcome::Cancelled => {
                kill_group(pid);
                let _ = child.start_kill();
                child.wait().await?;
                abort_reader(stdout_task);
                abort_reader(stderr_task);

                let command = command.join(" ");
                return Err(if timed_out {
                    warn!(event = "tool.timed_out", command = %command, timeout_ms = timeout.as_millis() as u64);
                    ToolError::Timeout { command, timeout }
                } else {
                    warn!(event = "tool.cancelled", command = %command);
                    ToolError::Cancelled { command }
                });
            }
        };
        kill_group(pid);

        let stdout = drain_reader(stdout_task).await;
        let stderr = drain_reader(stderr_task).await;

        Ok(self.finish(command, timeout, status, stdout, stderr, started))
    }

    fn finish(
        &self,
        command: Vec<String>,
        timeout: Duration,
        status: ExitStatus,
        stdout: String,
        stderr: String,
        started: Instant,
    ) -> ToolInvocation {
        let exit_code = status.code().unwrap_or(-1);
        let duration_ms = started.elapsed().as_millis() as u64;
        debug!(exit_code, duration_ms, "Tool exited");

        ToolInvocation {
            command,
            working_dir: self.working_dir.clone(),
            timeout,
            stdout,
            stderr,
            exit_code,
            duration_ms,
        }
    }
}

enum Outcome {
    Exited(ExitStatus),
    TimedOut,
    Cancelled,
}

fn spawn_reader<R: Read + Send + 'static>(mut source: R) -> std::thread::JoinHandle<String> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = source.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

/// Join a reader thread, giving up at `until`.
///
/// An abandoned reader ends on its own once the last writer closes the pipe.
fn join_reader(handle: std::thread::JoinHandle<String>, until: Instant) -> String {
    while !handle.is_finished() {
        if Instant::now() >= until {
            return String::new();
        }
        std::thread::sleep(POLL_INTERVAL / 5);
    }
    handle.join().unwrap_or_default()
}

/// SIGKILL every process in the group led by `pid`.
///
/// The group id is the child's pid because the child was spawned with
/// `process_group(0)`. Fails harmlessly when the group is already empty.
#[cfg(unix)]
fn kill_group(pid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return;
    };
    if pgid <= 0 {
        return;
    }
    // SAFETY: kill(2) takes no pointers; a negative pid addresses a process group
    let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if rc == 0 {
        debug!(pgid, "Killed process group");
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: u32) {}

async fn read_async<R: AsyncRead + Unpin>(mut source: R) -> String {
    let mut buf = Vec::new();
    let _ = source.read_to_end(&mut buf).await;
    String::from_utf8_lossy(&buf).into_owned()
}

async fn drain_reader(task: Option<tokio::task::JoinHandle<String>>) -> String {
    let Some(task) = task else {
        return String::new();
    };
    // A grandchild may still hold the pipe open after the child exits
    let abort = task.abort_handle();
    match tokio::time::timeout(DRAIN_GRACE, task).await {
        Ok(Ok(text)) => text,
        Ok(Err(_)) => String::new(),
        Err(_) => {
            abort.abort();
            String::new()
        }
    }
}

fn abort_reader(task: Option<tokio::task::JoinHandle<String>>) {
    if let Some(task) = task {
        task.abort();
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh() -> Invoker {
        Invoker::new("/bin/sh", std::env::temp_dir())
    }

    fn script(body: &str) -> Vec<String> {
        vec!["-c".to_string(), body.to_string()]
    }

    #[test]
    fn test_blocking_captures_stdio_and_exit_code() {
        let inv = sh()
            .run_blocking(&script("echo out; echo err >&2; exit 3"), Duration::from_secs(5))
            .unwrap();
        assert_eq!(inv.exit_code, 3);
        assert_eq!(inv.stdout.trim(), "out");
        assert_eq!(inv.stderr.trim(), "err");
        assert!(!inv.success());
        assert_eq!(inv.combined_output(), "out\nerr");
    }

    #[test]
    fn test_blocking_timeout_is_distinct_from_exit_code() {
        let err = sh()
            .run_blocking(&script("exec sleep 10"), Duration::from_millis(200))
            .unwrap_err();
        assert!(matches!(err, ToolError::Timeout { .. }));
    }

    #[test]
    fn test_blocking_returns_while_background_job_holds_pipe() {
        let started = Instant::now();
        let inv = sh()
            .run_blocking(&script("sleep 6 & echo hi"), Duration::from_secs(1))
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(inv.stdout.trim(), "hi");
    }

    #[tokio::test]
    async fn test_async_success() {
        let inv = sh()
            .run(&script("echo hello"), Duration::from_secs(5), None)
            .await
            .unwrap();
        assert!(inv.success());
        assert_eq!(inv.stdout.trim(), "hello");
        assert_eq!(inv.command[0], "/bin/sh");
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let inv = Invoker::new("/definitely/not/here", std::env::temp_dir());
        let err = inv.run(&[], Duration::from_secs(1), None).await.unwrap_err();
        assert!(matches!(err, ToolError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_arguments_are_not_shell_interpolated() {
        let inv = Invoker::new("/bin/echo", std::env::temp_dir());
        let out = inv
            .run(&["$(whoami); ls".to_string()], Duration::from_secs(5), None)
            .await
            .unwrap();
        assert_eq!(out.stdout.trim(), "$(whoami); ls");
    }
}

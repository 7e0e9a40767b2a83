//! vcr-tool: invocation of the external `vcr` render tool
//!
//! Layer 1 of the VCR agent. Resolves the binary, builds argument vectors
//! for its subcommands, and runs them with captured output, hard deadlines,
//! and cooperative cancellation.
//!
//! # Modules
//!
//! - `locate` - Binary resolution (PATH, then local debug/release builds)
//! - `commands` - Subcommand argument vectors and per-command timeouts
//! - `invoker` - Blocking and async process execution
//! - `cancel` - Cancellation handles
//! - `runner` - The `ToolRunner` seam and the process-backed runner
//! - `progress` - Frame progress parsing from build output
//! - `fakes` - Recording runner for tests

pub mod cancel;
pub mod commands;
pub mod error;
pub mod fakes;
pub mod invoker;
pub mod locate;
pub mod progress;
pub mod runner;

pub use cancel::{wait_cancelled, CancelHandle, CancelSignal};
pub use commands::{Backend, ParseBackendError, RenderCommand, ToolTimeouts};
pub use error::ToolError;
pub use fakes::{FakeResponse, RecordingToolRunner};
pub use invoker::{Invoker, ToolInvocation};
pub use locate::{locate_binary, locate_with_path, DEFAULT_BINARY};
pub use progress::{parse_frame_progress, progress_lines, FrameProgress};
pub use runner::{lint_manifest_text, ProcessRunner, ToolRunner};

/// Result type for render tool operations
pub type ToolResult<T> = std::result::Result<T, ToolError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_render_command_wire_format() {
        let cmd = RenderCommand::Check {
            manifest: PathBuf::from("renders/x.vcr"),
        };
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["subcommand"], "check");
        assert_eq!(json["manifest"], "renders/x.vcr");

        let back: RenderCommand = serde_json::from_value(json).unwrap();
        assert_eq!(back, cmd);
    }
}

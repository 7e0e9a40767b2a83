//! Error types for vcr-tool

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while invoking the render tool
#[derive(Error, Debug)]
pub enum ToolError {
    /// The binary was not found in any search location
    #[error("{name} binary not found (searched: {}). Run `cargo build` in the VCR project root or add {name} to PATH", format_paths(.searched))]
    NotFound { name: String, searched: Vec<PathBuf> },

    /// The process could not be started
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The process outlived its deadline and was killed
    #[error("`{command}` timed out after {} seconds", .timeout.as_secs_f64())]
    Timeout { command: String, timeout: Duration },

    /// The invocation was cancelled and the process was killed
    #[error("`{command}` was cancelled")]
    Cancelled { command: String },

    /// IO error while waiting on or reading from the process
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn format_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

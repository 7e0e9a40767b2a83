//! Render tool subcommands and their argument vectors.
//!
//! Arguments are always built as a vector and handed to the OS directly, so
//! prompt-derived file names are never interpreted by a shell.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rendering backend passed through to `build` / `render-frame`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Software,
    Gpu,
    Auto,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Software => "software",
            Backend::Gpu => "gpu",
            Backend::Auto => "auto",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("backend must be 'software', 'gpu', or 'auto', got '{0}'")]
pub struct ParseBackendError(pub String);

impl FromStr for Backend {
    type Err = ParseBackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "software" => Ok(Backend::Software),
            "gpu" => Ok(Backend::Gpu),
            "auto" => Ok(Backend::Auto),
            other => Err(ParseBackendError(other.to_string())),
        }
    }
}

/// One invocation of the render tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "subcommand", rename_all = "kebab-case")]
pub enum RenderCommand {
    /// Health check; exit 0 means healthy.
    Doctor,
    /// Schema gate; exit 0 means schema-valid.
    Check { manifest: PathBuf },
    /// Unreachable-content advisory; nonzero is a warning only.
    Lint { manifest: PathBuf },
    /// Full render.
    Build {
        manifest: PathBuf,
        output: PathBuf,
        backend: Option<Backend>,
    },
    /// Single-frame preview.
    RenderFrame {
        manifest: PathBuf,
        frame: u32,
        output: PathBuf,
        backend: Option<Backend>,
    },
}

impl RenderCommand {
    pub fn subcommand(&self) -> &'static str {
        match self {
            RenderCommand::Doctor => "doctor",
            RenderCommand::Check { .. } => "check",
            RenderCommand::Lint { .. } => "lint",
            RenderCommand::Build { .. } => "build",
            RenderCommand::RenderFrame { .. } => "render-frame",
        }
    }

    /// Argument vector, excluding the program itself.
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![self.subcommand().to_string()];
        match self {
            RenderCommand::Doctor => {}
            RenderCommand::Check { manifest } | RenderCommand::Lint { manifest } => {
                args.push(path_arg(manifest));
            }
            RenderCommand::Build {
                manifest,
                output,
                backend,
            } => {
                args.push(path_arg(manifest));
                args.push("-o".to_string());
                args.push(path_arg(output));
                push_backend(&mut args, *backend);
            }
            RenderCommand::RenderFrame {
                manifest,
                frame,
                output,
                backend,
            } => {
                args.push(path_arg(manifest));
                args.push("--frame".to_string());
                args.push(frame.to_string());
                args.push("-o".to_string());
                args.push(path_arg(output));
                push_backend(&mut args, *backend);
            }
        }
        args
    }

    /// Declared output artifact, for commands that produce one.
    pub fn output(&self) -> Option<&Path> {
        match self {
            RenderCommand::Build { output, .. } | RenderCommand::RenderFrame { output, .. } => {
                Some(output)
            }
            _ => None,
        }
    }

    /// Human-readable command line (for logs and diagnostics only).
    pub fn display_with(&self, program: &str) -> String {
        std::iter::once(program.to_string())
            .chain(self.args())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn push_backend(args: &mut Vec<String>, backend: Option<Backend>) {
    if let Some(backend) = backend {
        args.push("--backend".to_string());
        args.push(backend.as_str().to_string());
    }
}

/// Per-subcommand wall-clock limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolTimeouts {
    pub doctor: Duration,
    pub check: Duration,
    pub lint: Duration,
    pub build: Duration,
    pub render_frame: Duration,
}

impl Default for ToolTimeouts {
    fn default() -> Self {
        Self {
            doctor: Duration::from_secs(30),
            check: Duration::from_secs(30),
            lint: Duration::from_secs(30),
            build: Duration::from_secs(180),
            render_frame: Duration::from_secs(60),
        }
    }
}

impl ToolTimeouts {
    pub fn for_command(&self, command: &RenderCommand) -> Duration {
        match command {
            RenderCommand::Doctor => self.doctor,
            RenderCommand::Check { .. } => self.check,
            RenderCommand::Lint { .. } => self.lint,
            RenderCommand::Build { .. } => self.build,
            RenderCommand::RenderFrame { .. } => self.render_frame,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_parse() {
        assert_eq!("gpu".parse::<Backend>(), Ok(Backend::Gpu));
        let err = "cuda".parse::<Backend>().unwrap_err();
        assert!(err.to_string().contains("got 'cuda'"));
    }

    #[test]
    fn test_build_args_with_backend() {
        let cmd = RenderCommand::Build {
            manifest: PathBuf::from("renders/a_red_circle.vcr"),
            output: PathBuf::from("renders/a_red_circle.mov"),
            backend: Some(Backend::Software),
        };
        assert_eq!(
            cmd.args(),
            vec![
                "build",
                "renders/a_red_circle.vcr",
                "-o",
                "renders/a_red_circle.mov",
                "--backend",
                "software"
            ]
        );
        assert_eq!(cmd.output(), Some(Path::new("renders/a_red_circle.mov")));
    }

    #[test]
    fn test_render_frame_args() {
        let cmd = RenderCommand::RenderFrame {
            manifest: PathBuf::from("scene.vcr"),
            frame: 12,
            output: PathBuf::from("frame.png"),
            backend: None,
        };
        assert_eq!(
            cmd.args(),
            vec!["render-frame", "scene.vcr", "--frame", "12", "-o", "frame.png"]
        );
    }

    #[test]
    fn test_hostile_file_name_stays_one_argument() {
        let cmd = RenderCommand::Check {
            manifest: PathBuf::from("x; rm -rf ~.vcr"),
        };
        assert_eq!(cmd.args(), vec!["check", "x; rm -rf ~.vcr"]);
    }

    #[test]
    fn test_timeouts_per_command() {
        let t = ToolTimeouts::default();
        assert_eq!(t.for_command(&RenderCommand::Doctor), Duration::from_secs(30));
        let build = RenderCommand::Build {
            manifest: PathBuf::from("m"),
            output: PathBuf::from("o"),
            backend: None,
        };
        assert_eq!(t.for_command(&build), Duration::from_secs(180));
    }
}

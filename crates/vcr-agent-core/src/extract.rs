//! Pulling a manifest out of free-form model output.
//!
//! Precedence:
//! 1. a line starting with `version:` outside any fenced block, up to the
//!    next fence
//! 2. the first fenced code block
//! 3. the first `version:` line inside a fence that is never closed (a
//!    truncated answer), up to the end
//! 4. the whole response, trimmed

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

const MARKER: &str = "version:";
const FENCE: &str = "```";

/// Which rule produced the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    Marker,
    FencedBlock,
    RawText,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub text: String,
    pub method: ExtractionMethod,
}

impl Extraction {
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

fn fenced_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```(?:yaml)?\n?(.*?)```").expect("fence pattern is valid"))
}

/// Extract the manifest from `content`. The result may be empty.
pub fn extract_manifest(content: &str) -> Extraction {
    let markers = scan_markers(content);
    if let Some(start) = markers.outside {
        let rest = &content[start..];
        let end = rest.find(FENCE).unwrap_or(rest.len());
        return Extraction {
            text: rest[..end].trim().to_string(),
            method: ExtractionMethod::Marker,
        };
    }

    if let Some(block) = fenced_block_re().captures(content).and_then(|c| c.get(1)) {
        return Extraction {
            text: block.as_str().trim().to_string(),
            method: ExtractionMethod::FencedBlock,
        };
    }

    if let Some(start) = markers.unclosed {
        return Extraction {
            text: content[start..].trim().to_string(),
            method: ExtractionMethod::Marker,
        };
    }

    Extraction {
        text: content.trim().to_string(),
        method: ExtractionMethod::RawText,
    }
}

/// Byte offsets of candidate `version:` lines.
struct Markers {
    /// First one outside any fenced block.
    outside: Option<usize>,
    /// First one inside a trailing fence that is never closed.
    unclosed: Option<usize>,
}

fn scan_markers(content: &str) -> Markers {
    let mut offset = 0;
    let mut in_fence = false;
    let mut fenced_marker = None;
    for line in content.split_inclusive('\n') {
        let trimmed = line.trim_start();
        let at = offset + (line.len() - trimmed.len());
        if trimmed.starts_with(FENCE) {
            in_fence = !in_fence;
            fenced_marker = None;
        } else if trimmed.starts_with(MARKER) {
            if !in_fence {
                return Markers {
                    outside: Some(at),
                    unclosed: None,
                };
            }
            if fenced_marker.is_none() {
                fenced_marker = Some(at);
            }
        }
        offset += line.len();
    }
    Markers {
        outside: None,
        unclosed: fenced_marker.filter(|_| in_fence),
    }
}

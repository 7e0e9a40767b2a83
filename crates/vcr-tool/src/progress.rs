//! Build progress reported by the render tool on stderr.
//!
//! The tool prints `rendered frame N/M` as it goes.

const MARKER: &str = "rendered frame";

/// One progress report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameProgress {
    pub current: u32,
    pub total: u32,
}

impl FrameProgress {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            f64::from(self.current) / f64::from(self.total)
        }
    }
}

/// Parse `rendered frame N/M` anywhere in `line`.
pub fn parse_frame_progress(line: &str) -> Option<FrameProgress> {
    let idx = line.find(MARKER)?;
    let rest = line[idx + MARKER.len()..].trim_start();
    let (current, rest) = split_number(rest)?;
    let rest = rest.strip_prefix('/')?;
    let (total, _) = split_number(rest)?;
    Some(FrameProgress { current, total })
}

fn split_number(s: &str) -> Option<(u32, &str)> {
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let value = s[..end].parse().ok()?;
    Some((value, &s[end..]))
}

/// Trimmed stderr lines that carry frame progress.
pub fn progress_lines(stderr: &str) -> Vec<String> {
    stderr
        .lines()
        .map(str::trim)
        .filter(|line| line.contains(MARKER))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_progress() {
        let p = parse_frame_progress("[vcr] rendered frame 12/120 (3.1ms)").unwrap();
        assert_eq!(p, FrameProgress { current: 12, total: 120 });
        assert!((p.fraction() - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_parse_rejects_other_lines() {
        assert!(parse_frame_progress("encoding prores 4444").is_none());
        assert!(parse_frame_progress("rendered frame x/10").is_none());
    }

    #[test]
    fn test_progress_lines_filters_stderr() {
        let stderr = "warming up\n  rendered frame 1/2\nrendered frame 2/2\ndone\n";
        assert_eq!(
            progress_lines(stderr),
            vec!["rendered frame 1/2", "rendered frame 2/2"]
        );
    }
}

//! Render plan documents: semi-structured markdown describing a render.
//!
//! Parsing is best effort. A field that cannot be recognised is treated as
//! missing and left to the validator to report; nothing is defaulted.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use vcr_tool::{RenderCommand, ToolRunner};

use super::validate::validate;
use crate::domain::{FieldError, PlanDraft, PlanField, RenderPlan};

/// Named sections of a plan document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    IntentSummary,
    CapabilityCheck,
    RenderPlan,
    RequiredAssets,
    CliCommands,
    ExpectedOutputs,
    ValidationSteps,
}

impl Section {
    pub const ALL: [Section; 7] = [
        Section::IntentSummary,
        Section::CapabilityCheck,
        Section::RenderPlan,
        Section::RequiredAssets,
        Section::CliCommands,
        Section::ExpectedOutputs,
        Section::ValidationSteps,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Section::IntentSummary => "intent_summary",
            Section::CapabilityCheck => "capability_check",
            Section::RenderPlan => "render_plan",
            Section::RequiredAssets => "required_assets",
            Section::CliCommands => "cli_commands",
            Section::ExpectedOutputs => "expected_outputs",
            Section::ValidationSteps => "validation_steps",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        let name = name.to_ascii_lowercase();
        Section::ALL.into_iter().find(|s| s.as_str() == name)
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^\s*(?:#{1,4}\s*(?:\d+\.\s*)?|\d+\.\s*)?(?:\*\*)?(intent_summary|capability_check|render_plan|required_assets|cli_commands|expected_outputs|validation_steps)(?:\*\*)?\s*(:)?\s*(?:\*\*)?\s*(.*)$",
        )
        .expect("section header pattern is valid")
    })
}

/// Split `text` into its named sections.
///
/// Headers may be `### 1. name`, `**name**`, `name:` (alone on a line), or
/// `name: body` with the body starting on the same line. A repeated header
/// keeps the first occurrence.
pub fn parse_sections(text: &str) -> BTreeMap<Section, String> {
    let mut sections: BTreeMap<Section, String> = BTreeMap::new();
    let mut current: Option<(Section, Vec<&str>)> = None;

    for line in text.lines() {
        if let Some((section, inline)) = match_header(line) {
            if let Some((s, body)) = current.take() {
                sections.entry(s).or_insert_with(|| body.join("\n").trim().to_string());
            }
            let mut body = Vec::new();
            if !inline.is_empty() {
                body.push(inline);
            }
            current = Some((section, body));
        } else if let Some((_, body)) = current.as_mut() {
            body.push(line);
        }
    }
    if let Some((s, body)) = current {
        sections.entry(s).or_insert_with(|| body.join("\n").trim().to_string());
    }
    sections
}

fn match_header(line: &str) -> Option<(Section, &str)> {
    let caps = header_re().captures(line)?;
    let section = Section::from_name(caps.get(1)?.as_str())?;
    let has_colon = caps.get(2).is_some();
    let rest = caps.get(3).map_or("", |m| m.as_str().trim());
    // `render_plan fields follow` is prose, not a header
    if !rest.is_empty() && !has_colon {
        return None;
    }
    Some((section, rest))
}

fn table_row_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*\|\s*(?:\*\*)?`?(\w+)`?(?:\*\*)?\s*\|\s*([^|]+?)\s*\|")
            .expect("table row pattern is valid")
    })
}

fn bold_label_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(?:[-*+]\s+)?\*\*`?(\w+)`?:?\*\*\s*:?\s*(.+)$")
            .expect("bold label pattern is valid")
    })
}

fn inline_pair_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(?:[-*+]\s+)?`?(\w+)`?\s*[:=]\s*(.+)$").expect("inline pair pattern is valid")
    })
}

/// Recognise one `key`/`value` pair in a render_plan line.
///
/// Accepted shapes: a table row `| fps | 24 |`, a bolded label
/// `**fps**: 24`, and an inline `fps: 24`; values may be backticked.
fn parse_field_line(line: &str) -> Option<(String, String)> {
    let caps = table_row_re()
        .captures(line)
        .or_else(|| bold_label_re().captures(line))
        .or_else(|| inline_pair_re().captures(line))?;
    let key = caps.get(1)?.as_str().to_ascii_lowercase();
    let value = clean_value(caps.get(2)?.as_str());
    if value.is_empty() {
        return None;
    }
    Some((key, value))
}

fn clean_value(raw: &str) -> String {
    raw.trim()
        .trim_end_matches(',')
        .replace("**", "")
        .trim_matches(|c: char| c == '`' || c == '"' || c == '\'')
        .trim()
        .to_ascii_lowercase()
}

/// Parse render plan fields from a section body.
///
/// Unknown keys are ignored. A field given two different values is dropped
/// (and reported via the returned list) rather than resolved by guessing.
pub fn parse_plan_fields(text: &str) -> (PlanDraft, Vec<PlanField>) {
    let mut draft = PlanDraft::new();
    let mut conflicting = Vec::new();

    for line in text.lines() {
        let Some((key, value)) = parse_field_line(line) else {
            continue;
        };
        let Some(field) = PlanField::from_key(&key) else {
            continue;
        };
        if conflicting.contains(&field) {
            continue;
        }
        match draft.get(field).map(str::to_string) {
            Some(existing) if existing != value => {
                draft.remove(field);
                conflicting.push(field);
            }
            Some(_) => {}
            None => {
                draft.set(field, value);
            }
        }
    }
    (draft, conflicting)
}

/// Commands listed in a `cli_commands` body.
///
/// Lines of fenced blocks (minus comments) win; otherwise bare lines
/// starting with `vcr`, `ffprobe` or `test` are taken.
pub fn extract_cli_commands(text: &str) -> Vec<String> {
    let mut commands = Vec::new();
    let mut in_block = false;
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("```") {
            in_block = !in_block;
            continue;
        }
        if in_block && !trimmed.is_empty() && !trimmed.starts_with('#') {
            commands.push(trimmed.to_string());
        }
    }
    if commands.is_empty() {
        commands = text
            .lines()
            .map(str::trim)
            .filter(|l| {
                ["vcr", "ffprobe", "test"]
                    .iter()
                    .any(|p| l.strip_prefix(*p).is_some_and(|r| r.starts_with(char::is_whitespace)))
            })
            .map(str::to_string)
            .collect();
    }
    commands
}

fn output_flag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"-o\s+(\S+)").expect("output flag pattern is valid"))
}

fn check_cli_commands(commands: &[String], errors: &mut Vec<String>) {
    let check_idx = commands.iter().position(|c| c.contains("vcr check"));
    let build_idx = commands.iter().position(|c| c.contains("vcr build"));
    match (check_idx, build_idx) {
        (None, Some(_)) => {
            errors.push("cli_commands: vcr build without preceding vcr check".to_string())
        }
        (Some(check), Some(build)) if check > build => {
            errors.push("cli_commands: vcr check must come before vcr build".to_string())
        }
        _ => {}
    }

    for cmd in commands.iter().filter(|c| c.contains("vcr build")) {
        if let Some(caps) = output_flag_re().captures(cmd) {
            let output = &caps[1];
            if !output.ends_with(".mov") {
                errors.push(format!(
                    "cli_commands: output '{output}' should be .mov for ProRes"
                ));
            }
        }
    }
}

/// Outcome of validating a plan document.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DocumentReport {
    /// Every problem found, as human-readable lines.
    pub errors: Vec<String>,
    /// Render plan violations, also included in `errors`.
    pub field_errors: Vec<FieldError>,
    /// The validated plan, when the render_plan section passed.
    pub plan: Option<RenderPlan>,
    /// The document declared the request unsupported.
    pub unsupported: bool,
}

impl DocumentReport {
    pub fn passed(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Validate the structure and render plan of a plan document.
pub fn validate_document(text: &str) -> DocumentReport {
    let mut report = DocumentReport::default();
    let sections = parse_sections(text);

    for section in Section::ALL {
        if !sections.contains_key(&section) {
            report.errors.push(format!("Missing section: {section}"));
        }
    }
    if sections.is_empty() {
        report
            .errors
            .push("No sections found. Response may not follow the required format.".to_string());
        return report;
    }

    // Unsupported requests may leave the remaining sections null
    let capability = sections
        .get(&Section::CapabilityCheck)
        .map(|s| s.to_ascii_lowercase())
        .unwrap_or_default();
    if capability.contains("unsupported") && text.to_ascii_lowercase().contains("null") {
        report.unsupported = true;
        return report;
    }

    if let Some(intent) = sections.get(&Section::IntentSummary) {
        if intent.matches('\n').count() > 1 {
            report
                .errors
                .push("intent_summary should be a single sentence".to_string());
        }
    }

    if let Some(body) = sections.get(&Section::RenderPlan) {
        let (draft, conflicting) = parse_plan_fields(body);
        for field in conflicting {
            report
                .errors
                .push(format!("render_plan.{field} has conflicting values"));
        }
        match validate(&draft) {
            Ok(plan) => report.plan = Some(plan),
            Err(field_errors) => {
                report
                    .errors
                    .extend(field_errors.iter().map(|e| format!("render_plan.{e}")));
                report.field_errors = field_errors;
            }
        }
    }

    if let Some(body) = sections.get(&Section::CliCommands) {
        check_cli_commands(&extract_cli_commands(body), &mut report.errors);
    }

    report
}

/// Concrete manifest paths referenced by `vcr check` commands.
///
/// Placeholders such as `<MANIFEST_PATH>` are skipped.
pub fn referenced_manifests(text: &str) -> Option<Vec<String>> {
    let sections = parse_sections(text);
    let body = sections.get(&Section::CliCommands)?;
    let paths = extract_cli_commands(body)
        .iter()
        .filter(|c| c.contains("vcr check"))
        .filter_map(|c| {
            let mut parts = c.split_whitespace();
            parts.find(|p| *p == "check")?;
            parts.next().map(str::to_string)
        })
        .filter(|p| !p.contains('<'))
        .collect();
    Some(paths)
}

/// Run `vcr check` on every concrete manifest the document references.
///
/// Paths resolve against the runner's working directory. Returns the list
/// of failures; empty means the live check passed.
pub async fn validate_live(text: &str, runner: &dyn ToolRunner, timeout: Duration) -> Vec<String> {
    let Some(manifests) = referenced_manifests(text) else {
        return vec!["No cli_commands section for live validation".to_string()];
    };

    let mut errors = Vec::new();
    for manifest in manifests {
        let full_path = runner.working_dir().join(&manifest);
        if !full_path.exists() {
            errors.push(format!("Manifest not found: {}", full_path.display()));
            continue;
        }
        let command = RenderCommand::Check {
            manifest: full_path,
        };
        match runner.run(&command, timeout, None).await {
            Ok(inv) if inv.success() => {}
            Ok(inv) => errors.push(format!(
                "vcr check {manifest} failed (exit {}): {}",
                inv.exit_code,
                inv.stderr.trim()
            )),
            Err(e) => errors.push(format!("vcr check {manifest} failed: {e}")),
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use vcr_tool::{FakeResponse, RecordingToolRunner};

    const TABLE_DOC: &str = "\
### 1. intent_summary
A red circle grows from the centre of a black frame.

### 2. capability_check
Supported: procedural shapes only.

### 3. render_plan
| field | value |
|---|---|
| resolution | `1920x1080` |
| fps | 24 |
| duration | 5.0 |
| backend | `software` |
| alpha | false |
| prores_profile | 422hq |
| determinism_mode | on |

### 4. required_assets
None.

### 5. cli_commands
```bash
vcr check renders/red_circle.vcr
vcr build renders/red_circle.vcr -o renders/red_circle.mov --backend software
```

### 6. expected_outputs
- renders/red_circle.mov

### 7. validation_steps
- test -f renders/red_circle.mov
";

    #[test]
    fn test_table_document_passes() {
        let report = validate_document(TABLE_DOC);
        assert!(report.passed(), "{:?}", report.errors);
        assert_eq!(report.plan.unwrap().fps(), 24);
    }

    #[test]
    fn test_bold_and_inline_fields() {
        let body = "\
- **resolution**: `1280x720`
- **fps:** 30
duration: 2.5
- backend = gpu
**alpha** true
prores_profile: \"4444\"
determinism_mode: off
";
        let (draft, conflicting) = parse_plan_fields(body);
        assert!(conflicting.is_empty());
        assert_eq!(draft.get(PlanField::Resolution), Some("1280x720"));
        assert_eq!(draft.get(PlanField::Fps), Some("30"));
        assert_eq!(draft.get(PlanField::Alpha), Some("true"));
        assert_eq!(draft.get(PlanField::ProresProfile), Some("4444"));
        assert!(validate(&draft).is_ok());
    }

    #[test]
    fn test_unrecognised_field_is_missing_not_defaulted() {
        let doc = TABLE_DOC.replace("| fps | 24 |", "| frames per second | 24 |");
        let report = validate_document(&doc);
        assert_eq!(
            report.field_errors,
            vec![FieldError::Missing {
                field: PlanField::Fps
            }]
        );
        assert!(report.errors.contains(&"render_plan.missing field: fps".to_string()));
    }

    #[test]
    fn test_conflicting_values_are_dropped() {
        let (draft, conflicting) = parse_plan_fields("fps: 24\nfps: 30\nfps: 60\n");
        assert_eq!(draft.get(PlanField::Fps), None);
        assert_eq!(conflicting, vec![PlanField::Fps]);
    }

    #[test]
    fn test_missing_sections_reported() {
        let report = validate_document("**intent_summary**\nJust a sentence.\n");
        assert!(report.errors.contains(&"Missing section: render_plan".to_string()));
        assert!(report.errors.contains(&"Missing section: cli_commands".to_string()));
    }

    #[test]
    fn test_no_sections() {
        let report = validate_document("here is a video idea");
        assert!(report
            .errors
            .last()
            .unwrap()
            .starts_with("No sections found"));
    }

    #[test]
    fn test_inline_section_header() {
        let sections = parse_sections("intent_summary: A short loop.\ncapability_check:\nSupported\n");
        assert_eq!(sections[&Section::IntentSummary], "A short loop.");
        assert_eq!(sections[&Section::CapabilityCheck], "Supported");
    }

    #[test]
    fn test_unsupported_short_circuits() {
        let doc = "\
**intent_summary**
A 3D spinning teapot.
**capability_check**
UNSUPPORTED: 3D rendering is out of scope.
**render_plan**
null
**required_assets**
null
**cli_commands**
null
**expected_outputs**
null
**validation_steps**
null
";
        let report = validate_document(doc);
        assert!(report.unsupported);
        assert!(report.passed());
    }

    #[test]
    fn test_multi_line_intent_rejected() {
        let doc = TABLE_DOC.replace(
            "A red circle grows from the centre of a black frame.",
            "A red circle.\nIt grows.\nThen it stops.",
        );
        let report = validate_document(&doc);
        assert!(report
            .errors
            .contains(&"intent_summary should be a single sentence".to_string()));
    }

    #[test]
    fn test_build_before_check_rejected() {
        let mut errors = Vec::new();
        check_cli_commands(
            &[
                "vcr build a.vcr -o a.mp4".to_string(),
                "vcr check a.vcr".to_string(),
            ],
            &mut errors,
        );
        assert_eq!(
            errors,
            vec![
                "cli_commands: vcr check must come before vcr build",
                "cli_commands: output 'a.mp4' should be .mov for ProRes",
            ]
        );
    }

    #[test]
    fn test_bare_command_lines() {
        let cmds = extract_cli_commands("Run these:\nvcr check x.vcr\ntesting is fun\ntest -f out.mov\n");
        assert_eq!(cmds, vec!["vcr check x.vcr", "test -f out.mov"]);
    }

    #[test]
    fn test_referenced_manifests_skip_placeholders() {
        let doc = "cli_commands:\nvcr check <MANIFEST_PATH>\nvcr check scenes/a.vcr\n";
        assert_eq!(referenced_manifests(doc), Some(vec!["scenes/a.vcr".to_string()]));
    }

    #[tokio::test]
    async fn test_live_validation() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("renders")).unwrap();
        std::fs::write(dir.path().join("renders/red_circle.vcr"), "version: 1").unwrap();

        let runner = RecordingToolRunner::new(dir.path());
        let errors = validate_live(TABLE_DOC, &runner, Duration::from_secs(5)).await;
        assert!(errors.is_empty(), "{errors:?}");
        assert!(runner.was_issued("check"));

        let failing = RecordingToolRunner::new(dir.path())
            .respond("check", FakeResponse::exit(1, "bad layer"));
        let errors = validate_live(TABLE_DOC, &failing, Duration::from_secs(5)).await;
        assert_eq!(
            errors,
            vec!["vcr check renders/red_circle.vcr failed (exit 1): bad layer"]
        );
    }

    #[tokio::test]
    async fn test_live_validation_missing_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let runner = RecordingToolRunner::new(dir.path());
        let errors = validate_live(TABLE_DOC, &runner, Duration::from_secs(5)).await;
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("Manifest not found"));
        assert!(!runner.was_issued("check"));
    }
}

//! Structured extraction from raw worker output.
//!
//! Workers emit free text. The parser unions three strategies over it:
//! a strictly parsed fenced JSON block, heading-delimited sections with
//! list extraction, and role-specific marker lines. Parsing is pure and
//! never fails; an unparseable response degrades to a verbatim summary.

use crate::core::TaskId;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Structured fields extracted from one task's output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedOutput {
    pub source_task_id: TaskId,
    pub role: String,
    pub decisions: Vec<String>,
    pub artifacts: Vec<String>,
    pub files_modified: Vec<String>,
    pub dependencies: Vec<String>,
    pub recommendations: Vec<String>,
    pub summary: String,
    /// Heuristic confidence in [0, 1].
    pub quality: f64,
}

/// Fields a fenced JSON block may carry.
#[derive(Debug, Default, Deserialize)]
struct FencedBlock {
    #[serde(default)]
    decisions: Vec<String>,
    #[serde(default)]
    artifacts: Vec<String>,
    #[serde(default)]
    files_modified: Vec<String>,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default)]
    recommendations: Vec<String>,
    #[serde(default)]
    summary: Option<String>,
}

fn created_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^\s*Created:\s*(\S+)\s*$").expect("valid regex"))
}

fn modified_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^\s*Modified:\s*(\S+)\s*$").expect("valid regex"))
}

fn fenced_json_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)```json\s*\n(.*?)\n\s*```").expect("valid regex")
    })
}

/// Parse raw worker output into structured fields.
///
/// The three strategies are unioned: every field takes contributions
/// from any strategy that produced them, deduplicated in first-seen
/// order. When nothing yields a summary, the raw text is the summary.
pub fn parse(task_id: &TaskId, role: &str, raw: &str) -> ParsedOutput {
    let mut out = ParsedOutput {
        source_task_id: *task_id,
        role: role.to_string(),
        decisions: Vec::new(),
        artifacts: Vec::new(),
        files_modified: Vec::new(),
        dependencies: Vec::new(),
        recommendations: Vec::new(),
        summary: String::new(),
        quality: 0.0,
    };

    apply_fenced_block(raw, &mut out);
    apply_heading_sections(raw, &mut out);
    apply_marker_lines(raw, &mut out);

    dedupe(&mut out.decisions);
    dedupe(&mut out.artifacts);
    dedupe(&mut out.files_modified);
    dedupe(&mut out.dependencies);
    dedupe(&mut out.recommendations);

    if out.summary.trim().is_empty() {
        out.summary = raw.trim().to_string();
    }

    out.quality = quality_score(&out, raw);
    out
}

/// Strategy (a): a fenced ```json block, parsed strictly. A block that
/// fails to parse contributes nothing.
fn apply_fenced_block(raw: &str, out: &mut ParsedOutput) {
    let Some(captures) = fenced_json_re().captures(raw) else {
        return;
    };
    let Some(body) = captures.get(1) else {
        return;
    };
    let Ok(block) = serde_json::from_str::<FencedBlock>(body.as_str()) else {
        return;
    };
    out.decisions.extend(block.decisions);
    out.artifacts.extend(block.artifacts);
    out.files_modified.extend(block.files_modified);
    out.dependencies.extend(block.dependencies);
    out.recommendations.extend(block.recommendations);
    if let Some(summary) = block.summary {
        if !summary.trim().is_empty() {
            out.summary = summary;
        }
    }
}

/// Strategy (b): markdown headings delimit sections; bullet and numbered
/// list items under a recognized heading land in the matching field.
fn apply_heading_sections(raw: &str, out: &mut ParsedOutput) {
    let mut current: Option<&str> = None;
    let mut summary_lines: Vec<&str> = Vec::new();

    for line in raw.lines() {
        let trimmed = line.trim();
        if let Some(heading) = trimmed.strip_prefix('#') {
            let title = heading.trim_start_matches('#').trim().to_lowercase();
            current = match title.as_str() {
                "decisions" | "key decisions" => Some("decisions"),
                "artifacts" | "files created" => Some("artifacts"),
                "files modified" | "changes" => Some("files_modified"),
                "dependencies" => Some("dependencies"),
                "recommendations" | "suggestions" => Some("recommendations"),
                "summary" => Some("summary"),
                _ => None,
            };
            continue;
        }

        let Some(section) = current else {
            continue;
        };
        if section == "summary" {
            if !trimmed.is_empty() {
                summary_lines.push(trimmed);
            }
            continue;
        }
        let Some(item) = list_item(trimmed) else {
            continue;
        };
        match section {
            "decisions" => out.decisions.push(item.to_string()),
            "artifacts" => out.artifacts.push(item.to_string()),
            "files_modified" => out.files_modified.push(item.to_string()),
            "dependencies" => out.dependencies.push(item.to_string()),
            "recommendations" => out.recommendations.push(item.to_string()),
            _ => {}
        }
    }

    if !summary_lines.is_empty() && out.summary.trim().is_empty() {
        out.summary = summary_lines.join(" ");
    }
}

/// Strip a bullet or numbered-list prefix, if present.
fn list_item(line: &str) -> Option<&str> {
    if let Some(rest) = line.strip_prefix("- ").or_else(|| line.strip_prefix("* ")) {
        return Some(rest.trim());
    }
    let mut chars = line.char_indices();
    let digits_end = chars
        .by_ref()
        .take_while(|(_, c)| c.is_ascii_digit())
        .map(|(i, _)| i + 1)
        .last()?;
    let rest = &line[digits_end..];
    rest.strip_prefix(". ").or_else(|| rest.strip_prefix(") ")).map(str::trim)
}

/// Strategy (c): marker lines. "Created:" feeds artifacts, "Modified:"
/// feeds files_modified; dedup later guarantees each path lands once.
fn apply_marker_lines(raw: &str, out: &mut ParsedOutput) {
    for captures in created_re().captures_iter(raw) {
        if let Some(path) = captures.get(1) {
            out.artifacts.push(path.as_str().to_string());
        }
    }
    for captures in modified_re().captures_iter(raw) {
        if let Some(path) = captures.get(1) {
            out.files_modified.push(path.as_str().to_string());
        }
    }
}

fn dedupe(items: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    items.retain(|item| seen.insert(item.clone()));
}

/// Fields a role is expected to produce, for quality scoring.
fn expected_fields(role: &str) -> &'static [&'static str] {
    match role {
        "architect" => &["decisions", "summary"],
        "backend" | "frontend" | "database" | "docs" => &["artifacts", "files_modified"],
        "tester" => &["artifacts", "summary"],
        "reviewer" => &["recommendations", "summary"],
        _ => &["summary"],
    }
}

/// Score extraction confidence in [0, 1].
///
/// Three signals: presence of the fields this role is expected to emit,
/// the share of output lines that parsed into structure, and whether
/// path-valued fields actually look like paths.
fn quality_score(out: &ParsedOutput, raw: &str) -> f64 {
    let field_len = |name: &str| -> usize {
        match name {
            "decisions" => out.decisions.len(),
            "artifacts" => out.artifacts.len(),
            "files_modified" => out.files_modified.len(),
            "dependencies" => out.dependencies.len(),
            "recommendations" => out.recommendations.len(),
            "summary" => usize::from(!out.summary.trim().is_empty()),
            _ => 0,
        }
    };

    let expected = expected_fields(&out.role);
    let present = expected.iter().filter(|f| field_len(f) > 0).count();
    let presence = if expected.is_empty() {
        0.0
    } else {
        present as f64 / expected.len() as f64
    };

    let structured_items = out.decisions.len()
        + out.artifacts.len()
        + out.files_modified.len()
        + out.dependencies.len()
        + out.recommendations.len();
    let total_lines = raw.lines().filter(|l| !l.trim().is_empty()).count().max(1);
    let structure = (structured_items as f64 / total_lines as f64).min(1.0);

    let path_fields: Vec<&String> = out.artifacts.iter().chain(&out.files_modified).collect();
    let consistency = if path_fields.is_empty() {
        // nothing to contradict
        1.0
    } else {
        let plausible = path_fields
            .iter()
            .filter(|p| !p.contains(' ') && !p.is_empty())
            .count();
        plausible as f64 / path_fields.len() as f64
    };

    (presence * 0.5 + structure * 0.3 + consistency * 0.2).clamp(0.0, 1.0)
}

//! Enrichment flow from completed tasks into their dependents.
//!
//! When a task completes, its parsed output becomes enrichment entries
//! merged into every direct dependent's inputs before that dependent's
//! prompt is assembled.

use crate::output::parser::ParsedOutput;
use serde_json::Value;
use std::collections::HashMap;

/// Turn a parsed output into enrichment entries.
///
/// Empty fields are skipped so they cannot clobber a sibling's
/// contribution with an empty array.
pub fn enrichment(parsed: &ParsedOutput) -> HashMap<String, Value> {
    let mut entries = HashMap::new();
    let array = |items: &[String]| Value::Array(items.iter().cloned().map(Value::String).collect());

    if !parsed.decisions.is_empty() {
        entries.insert("decisions".to_string(), array(&parsed.decisions));
    }
    if !parsed.artifacts.is_empty() {
        entries.insert("artifacts".to_string(), array(&parsed.artifacts));
    }
    if !parsed.files_modified.is_empty() {
        entries.insert("files_modified".to_string(), array(&parsed.files_modified));
    }
    if !parsed.dependencies.is_empty() {
        entries.insert("dependencies".to_string(), array(&parsed.dependencies));
    }
    if !parsed.recommendations.is_empty() {
        entries.insert("recommendations".to_string(), array(&parsed.recommendations));
    }
    if !parsed.summary.trim().is_empty() {
        entries.insert(
            format!("summary_{}", parsed.role),
            Value::String(parsed.summary.clone()),
        );
    }
    entries
}

/// Merge enrichment entries into a task's inputs.
///
/// Array values are unioned element-wise in first-seen order, so the
/// merge is idempotent and insensitive to sibling completion order.
/// Scalar values are last-write-wins: when two siblings complete near
/// each other under parallel execution, which scalar survives depends
/// on settle order. Keyed summaries (`summary_<role>`) keep role
/// summaries from colliding in practice.
pub fn merge_enrichment(inputs: &mut HashMap<String, Value>, entries: &HashMap<String, Value>) {
    for (key, value) in entries {
        match (inputs.get_mut(key), value) {
            (Some(Value::Array(existing)), Value::Array(incoming)) => {
                for item in incoming {
                    if !existing.contains(item) {
                        existing.push(item.clone());
                    }
                }
            }
            _ => {
                inputs.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Render a task's inputs as a prompt suffix.
pub fn render_inputs(inputs: &HashMap<String, Value>) -> String {
    if inputs.is_empty() {
        return String::new();
    }
    let mut keys: Vec<&String> = inputs.keys().collect();
    keys.sort();

    let mut text = String::from("\n\nContext from completed dependencies:\n");
    for key in keys {
        match &inputs[key] {
            Value::Array(items) => {
                text.push_str(&format!("{}:\n", key));
                for item in items {
                    if let Value::String(s) = item {
                        text.push_str(&format!("- {}\n", s));
                    } else {
                        text.push_str(&format!("- {}\n", item));
                    }
                }
            }
            Value::String(s) => text.push_str(&format!("{}: {}\n", key, s)),
            other => text.push_str(&format!("{}: {}\n", key, other)),
        }
    }
    text
}

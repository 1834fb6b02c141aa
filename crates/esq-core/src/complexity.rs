//! # Structural Complexity
//!
//! Heuristic score over a compiled query body:
//!
//! | Signal                                   | Points |
//! |------------------------------------------|--------|
//! | nesting depth > 5                        | +3     |
//! | > 10 entries across bool buckets         | +2     |
//! | any `wildcard` clause                    | +2     |
//! | any `regexp` clause                      | +3     |
//! | > 5 `range` clauses                      | +1     |

use serde::{Deserialize, Serialize};
use serde_json::Value;

const MAX_DEPTH: usize = 5;
const MAX_BOOL_ENTRIES: usize = 10;
const MAX_RANGE_CLAUSES: usize = 5;

const BOOL_BUCKETS: [&str; 4] = ["must", "should", "must_not", "filter"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ComplexityReport {
    pub score: u32,
    pub depth: usize,
    pub bool_entries: usize,
    pub has_wildcard: bool,
    pub has_regexp: bool,
    pub range_clauses: usize,
    /// Human-readable findings, one per signal that fired.
    pub issues: Vec<String>,
}

impl ComplexityReport {
    pub fn description(&self) -> String {
        self.issues.join(", ")
    }
}

pub fn analyze_complexity(query: &Value) -> ComplexityReport {
    let mut report = ComplexityReport {
        depth: depth(query),
        bool_entries: count_bool_entries(query),
        has_wildcard: contains_key(query, "wildcard"),
        has_regexp: contains_key(query, "regexp"),
        range_clauses: count_key(query, "range"),
        ..Default::default()
    };

    if report.depth > MAX_DEPTH {
        report.score += 3;
        report
            .issues
            .push(format!("nesting depth too deep ({} levels)", report.depth));
    }
    if report.bool_entries > MAX_BOOL_ENTRIES {
        report.score += 2;
        report.issues.push(format!(
            "too many boolean clauses ({})",
            report.bool_entries
        ));
    }
    if report.has_wildcard {
        report.score += 2;
        report.issues.push("contains wildcard queries".into());
    }
    if report.has_regexp {
        report.score += 3;
        report.issues.push("contains regexp queries".into());
    }
    if report.range_clauses > MAX_RANGE_CLAUSES {
        report.score += 1;
        report
            .issues
            .push(format!("too many range queries ({})", report.range_clauses));
    }

    report
}

/// Containers count one level each; scalars are depth 0.
fn depth(value: &Value) -> usize {
    match value {
        Value::Object(map) => 1 + map.values().map(depth).max().unwrap_or(0),
        Value::Array(items) => 1 + items.iter().map(depth).max().unwrap_or(0),
        _ => 0,
    }
}

fn count_bool_entries(value: &Value) -> usize {
    match value {
        Value::Object(map) => map
            .iter()
            .map(|(key, child)| {
                let own = match (key.as_str(), child) {
                    ("bool", Value::Object(bool_body)) => BOOL_BUCKETS
                        .iter()
                        .filter_map(|bucket| bool_body.get(*bucket))
                        .map(|entries| entries.as_array().map_or(1, Vec::len))
                        .sum(),
                    _ => 0,
                };
                own + count_bool_entries(child)
            })
            .sum(),
        Value::Array(items) => items.iter().map(count_bool_entries).sum(),
        _ => 0,
    }
}

fn contains_key(value: &Value, needle: &str) -> bool {
    match value {
        Value::Object(map) => map
            .iter()
            .any(|(key, child)| key == needle || contains_key(child, needle)),
        Value::Array(items) => items.iter().any(|item| contains_key(item, needle)),
        _ => false,
    }
}

fn count_key(value: &Value, needle: &str) -> usize {
    match value {
        Value::Object(map) => map
            .iter()
            .map(|(key, child)| usize::from(key == needle) + count_key(child, needle))
            .sum(),
        Value::Array(items) => items.iter().map(|item| count_key(item, needle)).sum(),
        _ => 0,
    }
}

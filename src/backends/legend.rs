// SPDX-License-Identifier: Apache-2.0

//! Series naming from legend templates.

use std::sync::OnceLock;

use regex::{Captures, Regex};

use queryhub_core::Labels;

/// Legend value asking for the backend's default naming
pub const LEGEND_AUTO: &str = "__auto";

fn legend_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{\{\s*(.+?)\s*\}\}").expect("legend pattern is valid"))
}

/// Returns true when `legend` is an explicit template rather than a request for defaults
pub fn is_explicit(legend: Option<&str>) -> bool {
    matches!(legend, Some(l) if !l.is_empty() && l != LEGEND_AUTO)
}

/// Builds a series name.
///
/// `{{ label }}` placeholders are replaced by label values (missing labels
/// become empty). Without an explicit legend the name is the label set
/// (`{a="1", b="2"}`), or the expression when there are no labels.
pub fn format_name(labels: &Labels, legend: Option<&str>, expr: &str) -> String {
    match legend {
        Some(template) if is_explicit(legend) => legend_pattern()
            .replace_all(template, |caps: &Captures<'_>| {
                labels.get(&caps[1]).cloned().unwrap_or_default()
            })
            .into_owned(),
        _ if labels.is_empty() => expr.to_string(),
        _ => format_labels(labels),
    }
}

/// Formats a label set as `{k1="v1", k2="v2"}` with keys in sorted order.
pub fn format_labels(labels: &Labels) -> String {
    let pairs: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{k}=\"{v}\""))
        .collect();
    format!("{{{}}}", pairs.join(", "))
}

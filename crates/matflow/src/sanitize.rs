//! Helpers for sanitizing caller-supplied names before they touch the
//! filesystem or tracing span attributes.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

/// Returns only the filename component of a path (no directory).
///
/// Used for span fields so logs never expose the work directory.
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

fn unsafe_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^A-Za-z0-9_.-]").expect("static regex"))
}

/// Reduces an arbitrary identifier to a single safe path component.
///
/// Path separators and whitespace become `_`, every other character outside
/// `[A-Za-z0-9_.-]` is dropped, and leading/trailing dots and underscores are
/// trimmed so the result can never be `.`, `..` or a hidden file. Falls back
/// to `"material"` when nothing survives.
pub fn secure_filename(name: &str) -> String {
    let spaced: String = name
        .chars()
        .map(|c| {
            if c == '/' || c == '\\' || c.is_whitespace() {
                '_'
            } else {
                c
            }
        })
        .collect();

    let cleaned = unsafe_chars().replace_all(&spaced, "");
    let trimmed = cleaned.trim_matches(|c| c == '.' || c == '_');

    if trimmed.is_empty() {
        "material".to_string()
    } else {
        trimmed.to_string()
    }
}

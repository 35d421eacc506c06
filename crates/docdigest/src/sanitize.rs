//! Helpers for sanitizing data before it enters logs, spans or file names.
//!
//! Uploaded paths can contain user names and the provider endpoint may carry
//! an API key in its query string; neither should show up in traces.

use std::path::Path;

/// Returns only the filename component of a path (no directory).
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

/// Drops the query string and userinfo from an endpoint URL.
///
/// - `https://host/v1/models?key=abc` → `https://host/v1/models`
/// - `https://user:pw@host/path` → `https://****@host/path`
pub fn redact_endpoint(url: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);

    if let Some(scheme_end) = without_query.find("://") {
        let after_scheme = &without_query[scheme_end + 3..];
        let authority_end = after_scheme.find('/').unwrap_or(after_scheme.len());
        if let Some(at_pos) = after_scheme[..authority_end].find('@') {
            let scheme = &without_query[..scheme_end + 3];
            return format!("{}****@{}", scheme, &after_scheme[at_pos + 1..]);
        }
    }

    without_query.to_string()
}

/// Turns a user supplied display name into a safe artifact file stem.
///
/// Strips the extension, keeps ASCII alphanumerics plus `-` and `_`, and
/// collapses everything else into single underscores.
pub fn artifact_stem(display_name: &str) -> String {
    let base = Path::new(display_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(display_name);

    let mut stem = String::with_capacity(base.len());
    for c in base.chars() {
        if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
            stem.push(c);
        } else if !stem.ends_with('_') {
            stem.push('_');
        }
    }

    let stem = stem.trim_matches('_');
    if stem.is_empty() {
        "document".to_string()
    } else {
        stem.chars().take(80).collect()
    }
}

//! Filesystem-safe process names.
//!
//! PID files and log files are named after the supervised process; the
//! name must therefore be a safe ASCII filename. Forbidden characters
//! collapse to `_`, and a name that sanitizes to nothing becomes
//! `"unknown"`.

/// Fallback for names that sanitize to the empty string.
pub const UNKNOWN_NAME: &str = "unknown";

/// Map a process name to a filesystem-safe ASCII string.
///
/// Idempotent: sanitizing an already-sanitized name is a no-op.
pub fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        UNKNOWN_NAME.to_string()
    } else {
        cleaned
    }
}

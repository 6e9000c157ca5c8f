//! Command normalization applied before any pattern matching.

/// Collapse backslash-newline continuations and whitespace runs to single spaces.
///
/// Splitting a command across continuation lines must not dodge single-line
/// patterns, so `rm -rf \` + newline + `/` normalizes to `rm -rf /`.
pub fn normalize_command(raw: &str) -> String {
    let joined = raw.replace("\\\r\n", " ").replace("\\\n", " ");
    joined.split_whitespace().collect::<Vec<_>>().join(" ")
}

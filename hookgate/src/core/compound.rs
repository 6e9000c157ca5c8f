//! Compound shell-feature validator.
//!
//! Owns shell-feature risk only (process substitution, `IFS`, brace command
//! lists, nested substitution). Dangerous verbs belong to
//! [`crate::core::dangerous`].

use std::sync::LazyLock;

use regex::Regex;

use crate::core::normalize::normalize_command;
use crate::core::rules::RuleRegistry;
use crate::core::types::Verdict;

/// Evaluate `command` against the shell-feature table.
pub fn check_compound(command: &str, registry: &RuleRegistry) -> Verdict {
    let normalized = normalize_command(command);
    if normalized.is_empty() {
        return Verdict::allow();
    }
    match RuleRegistry::first_match(&registry.shell_features, &normalized) {
        Some(rule) => rule.verdict(&normalized),
        None => Verdict::allow(),
    }
}

/// True when a comma brace group sits where the shell expects a command.
///
/// `{cat,/etc/passwd}` expands to `cat /etc/passwd` and runs it, while
/// `*.{ts,js}` or `src/{a,b}.rs` are ordinary filename expansions.
pub fn brace_in_command_position(command: &str) -> bool {
    static BRACE_GROUP: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\{[^{}\s]*,[^{}\s]*\}").unwrap());

    BRACE_GROUP.find_iter(command).any(|group| {
        let before = command[..group.start()].trim_end();
        let last_word = before.rsplit(char::is_whitespace).next().unwrap_or("");
        before.is_empty()
            || before.ends_with([';', '&', '|', '(', '`', '{'])
            || matches!(last_word, "then" | "do" | "else")
    })
}

/// True when a `$(...)` or backtick substitution appears inside another `$(...)`.
///
/// Single-quoted text is skipped and `$((...))` arithmetic does not count as a
/// substitution frame.
pub fn has_nested_substitution(command: &str) -> bool {
    // true = command substitution frame, false = plain or arithmetic paren.
    let mut frames: Vec<bool> = Vec::new();
    let mut in_single_quote = false;
    let mut chars = command.chars().peekable();

    while let Some(ch) = chars.next() {
        if in_single_quote {
            if ch == '\'' {
                in_single_quote = false;
            }
            continue;
        }
        match ch {
            '\'' => in_single_quote = true,
            '\\' => {
                chars.next();
            }
            '$' if chars.peek() == Some(&'(') => {
                chars.next();
                if chars.peek() == Some(&'(') {
                    frames.push(false);
                    continue;
                }
                if frames.contains(&true) {
                    return true;
                }
                frames.push(true);
            }
            '`' if frames.contains(&true) => return true,
            '(' => frames.push(false),
            ')' => {
                frames.pop();
            }
            _ => {}
        }
    }
    false
}

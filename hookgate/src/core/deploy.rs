//! Deployment-safety checker.
//!
//! Production targets are evaluated before rollback and infrastructure
//! advisories, so a command matching both tables is denied.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;

use crate::core::normalize::normalize_command;
use crate::core::rules::RuleRegistry;
use crate::core::types::Verdict;

static MESSAGE_ARG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(\s(?:-[A-Za-z]*m|--message)(?:=|\s+))(?:"(?:[^"\\]|\\.)*"|'[^']*'|\S+)"#)
        .expect("valid regex")
});

/// Blanks the text of `-m`/`--message` arguments so prose in a commit or
/// tag message is never read as a deployment.
fn without_messages(command: &str) -> Cow<'_, str> {
    MESSAGE_ARG.replace_all(command, "$1''")
}

pub fn check_deployment(command: &str, registry: &RuleRegistry) -> Verdict {
    let normalized = normalize_command(command);
    if normalized.is_empty() {
        return Verdict::allow();
    }
    let scanned = without_messages(&normalized);

    if registry.deployment_context.is_match(&scanned)
        && let Some(rule) = RuleRegistry::first_match(&registry.production_targets, &scanned)
    {
        return rule.verdict(&normalized);
    }

    match RuleRegistry::first_match(&registry.deployment_advisories, &scanned) {
        Some(rule) => rule.verdict(&normalized),
        None => Verdict::allow(),
    }
}

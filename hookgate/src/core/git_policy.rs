//! Git commit-message and branch-naming policy.
//!
//! Commit grammar violations are denied. Branch naming problems, long
//! subjects and direct work on protected branches are advisory only.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;

use crate::core::normalize::normalize_command;
use crate::core::types::Verdict;

pub const DEFAULT_COMMIT_TYPES: &[&str] = &[
    "feat", "fix", "docs", "style", "refactor", "perf", "test", "build", "ci", "chore", "revert",
];
pub const DEFAULT_BRANCH_PREFIXES: &[&str] = &[
    "feature/", "fix/", "issue/", "bug/", "chore/", "hotfix/", "docs/", "refactor/", "test/",
    "release/",
];
pub const DEFAULT_PROTECTED_BRANCHES: &[&str] = &["main", "master", "dev"];
pub const DEFAULT_MAX_SUBJECT_LEN: usize = 72;

static COMMIT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bgit\s+commit\b").unwrap());
static COMMIT_MESSAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)\s(?:-[a-zA-Z]*m|--message)(?:=|\s+)(?:"((?:[^"\\]|\\.)*)"|'([^']*)'|([^\s;&|]+))"#)
        .unwrap()
});
static BRANCH_CREATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bgit\s+(?:checkout\s+-[bB]|switch\s+(?:-[cC]|--create)|branch)\s+([^\s\-;&|][^\s;&|]*)")
        .unwrap()
});
static PUSH_TARGET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bgit\s+push\s+(?:-{1,2}[\w-]+\s+)*[\w./:@-]+\s+([^\s\-;&|][^\s;&|]*)").unwrap()
});
static ISSUE_NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").unwrap());

/// Compiled git policy.
#[derive(Debug, Clone)]
pub struct GitPolicy {
    commit_types: Vec<String>,
    require_scope: bool,
    branch_prefixes: Vec<String>,
    protected_branches: Vec<String>,
    max_subject_len: usize,
    subject: Regex,
}

impl GitPolicy {
    pub fn new(
        commit_types: &[String],
        require_scope: bool,
        branch_prefixes: &[String],
        protected_branches: &[String],
        max_subject_len: usize,
    ) -> Result<Self> {
        let types = commit_types
            .iter()
            .map(|t| regex::escape(t))
            .collect::<Vec<_>>()
            .join("|");
        let scope_quantifier = if require_scope { "" } else { "?" };
        let subject = Regex::new(&format!(
            r"^(?:{types})(?:\((?:#\d+|[A-Za-z0-9][\w./-]*)\)){scope_quantifier}!?: \S"
        ))
        .context("compile commit subject grammar")?;
        Ok(Self {
            commit_types: commit_types.to_vec(),
            require_scope,
            branch_prefixes: branch_prefixes.to_vec(),
            protected_branches: protected_branches.to_vec(),
            max_subject_len,
            subject,
        })
    }

    /// Exact, case-sensitive protected-branch check.
    pub fn is_protected(&self, branch: &str) -> bool {
        self.protected_branches.iter().any(|name| name == branch)
    }

    fn expected_grammar(&self) -> String {
        let scope = if self.require_scope {
            "type(#issue): description  or  type(scope): description"
        } else {
            "type(#issue): description  or  type(scope): description  or  type: description"
        };
        format!("{scope}\nAllowed types: {}", self.commit_types.join(", "))
    }
}

impl Default for GitPolicy {
    fn default() -> Self {
        let owned = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self::new(
            &owned(DEFAULT_COMMIT_TYPES),
            true,
            &owned(DEFAULT_BRANCH_PREFIXES),
            &owned(DEFAULT_PROTECTED_BRANCHES),
            DEFAULT_MAX_SUBJECT_LEN,
        )
        .expect("built-in commit grammar compiles")
    }
}

/// Evaluate a shell command against the git policy.
///
/// `current_branch` is the checked-out branch when the caller could determine
/// it; it only feeds the protected-branch commit advisory.
pub fn check_git(command: &str, policy: &GitPolicy, current_branch: Option<&str>) -> Verdict {
    let normalized = normalize_command(command);
    let mut advisories = Vec::new();

    if COMMIT.is_match(&normalized) {
        // Extract from the raw text so multi-line messages keep their first line.
        let raw = command.replace("\\\n", " ");
        let start = COMMIT.find(&raw).map_or(0, |m| m.end());
        if let Some(message) = extract_message(&raw[start..]) {
            let subject = message.lines().next().unwrap_or("").trim();
            if !message.trim_start().starts_with("$(") {
                if !policy.subject.is_match(subject) {
                    return Verdict::deny(
                        format!(
                            "INVALID COMMIT FORMAT: '{}'\nExpected: {}",
                            subject,
                            policy.expected_grammar()
                        ),
                        Some("commit-grammar"),
                    );
                }
                if subject.chars().count() > policy.max_subject_len {
                    advisories.push(format!(
                        "Commit subject is {} characters; keep it under {}.",
                        subject.chars().count(),
                        policy.max_subject_len
                    ));
                }
            }
        }
        if let Some(branch) = current_branch.filter(|b| policy.is_protected(b)) {
            advisories.push(format!(
                "Committing directly on protected branch '{branch}'; prefer a feature branch."
            ));
        }
    }

    if let Some(caps) = BRANCH_CREATE.captures(&normalized) {
        let name = &caps[1];
        if let Some(advice) = branch_name_advice(name, policy) {
            advisories.push(advice);
        }
    }

    if let Some(caps) = PUSH_TARGET.captures(&normalized) {
        let refspec = &caps[1];
        let target = refspec.rsplit(':').next().unwrap_or(refspec);
        if policy.is_protected(target) {
            advisories.push(format!(
                "Pushing directly to protected branch '{target}'; open a pull request instead."
            ));
        }
    }

    if advisories.is_empty() {
        Verdict::allow()
    } else {
        Verdict::advisory(advisories.join("\n"))
    }
}

fn extract_message(after_commit: &str) -> Option<String> {
    let caps = COMMIT_MESSAGE.captures(after_commit)?;
    let message = caps
        .get(1)
        .or_else(|| caps.get(2))
        .or_else(|| caps.get(3))?
        .as_str();
    Some(message.replace("\\\"", "\""))
}

fn branch_name_advice(name: &str, policy: &GitPolicy) -> Option<String> {
    if policy.is_protected(name) {
        return None;
    }
    let Some(prefix) = policy
        .branch_prefixes
        .iter()
        .find(|prefix| name.starts_with(prefix.as_str()))
    else {
        return Some(format!(
            "Branch '{}' does not use a recognised prefix ({}).",
            name,
            policy.branch_prefixes.join(", ")
        ));
    };
    if prefix == "issue/" && !ISSUE_NUMBER.is_match(&name[prefix.len()..]) {
        return Some(format!(
            "Branch '{name}' uses the issue/ prefix without an issue number (e.g. issue/123-short-name)."
        ));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(command: &str) -> Verdict {
        check_git(command, &GitPolicy::default(), None)
    }

    #[test]
    fn bad_commit_message_is_denied() {
        match check(r#"git commit -m "bad commit message""#) {
            Verdict::Deny { reason, rule } => {
                assert!(reason.contains("INVALID COMMIT FORMAT"));
                assert!(reason.contains("type(scope): description"));
                assert_eq!(rule.as_deref(), Some("commit-grammar"));
            }
            other => panic!("expected deny, got {other:?}"),
        }
    }

    #[test]
    fn conventional_commits_are_allowed() {
        assert!(check(r#"git commit -m "feat(#123): add auth""#).is_allow());
        assert!(check(r#"git commit -m 'fix(api): handle empty body'"#).is_allow());
        assert!(check(r#"git add . && git commit -am "chore(deps): bump regex""#).is_allow());
        assert!(check(r#"git commit --message="docs(readme): typo""#).is_allow());
    }

    #[test]
    fn scope_can_be_optional() {
        let types = vec!["feat".to_string(), "fix".to_string()];
        let policy = GitPolicy::new(&types, false, &[], &[], 72).expect("policy");
        assert!(check_git(r#"git commit -m "fix: typo""#, &policy, None).is_allow());
        assert!(check_git(r#"git commit -m "wip""#, &policy, None).is_deny());
        assert!(check(r#"git commit -m "fix: typo""#).is_deny());
    }

    #[test]
    fn unknown_type_is_denied() {
        assert!(check(r#"git commit -m "feature(#1): nope""#).is_deny());
    }

    #[test]
    fn heredoc_and_editor_commits_are_not_judged() {
        assert!(check(r#"git commit -m "$(cat <<'EOF'
anything goes
EOF
)""#)
        .is_allow());
        assert!(check("git commit").is_allow());
        assert!(check("git commit -F msg.txt").is_allow());
    }

    #[test]
    fn multiline_message_uses_first_line() {
        let command = "git commit -m \"feat(ui): add button\n\nlonger body text\"";
        assert!(check(command).is_allow());
    }

    #[test]
    fn long_subject_is_advisory() {
        let subject = format!("feat(ui): {}", "x".repeat(80));
        let verdict = check(&format!("git commit -m \"{subject}\""));
        assert!(matches!(verdict, Verdict::Advisory { .. }));
    }

    #[test]
    fn branch_prefixes_are_advisory() {
        assert!(check("git checkout -b feature/login").is_allow());
        assert!(check("git switch -c fix/crash").is_allow());
        assert!(check("git checkout -b issue/42-login").is_allow());
        assert!(matches!(
            check("git checkout -b my-branch"),
            Verdict::Advisory { .. }
        ));
        match check("git checkout -b issue/login") {
            Verdict::Advisory { message } => assert!(message.contains("issue number")),
            other => panic!("expected advisory, got {other:?}"),
        }
        assert!(check("git branch -D old").is_allow());
    }

    #[test]
    fn protected_branch_names_are_case_sensitive() {
        let policy = GitPolicy::default();
        assert!(policy.is_protected("main"));
        assert!(!policy.is_protected("Main"));
        assert!(!policy.is_protected("main2"));
        assert!(check("git checkout -b main").is_allow());
    }

    #[test]
    fn commit_on_protected_branch_is_advisory() {
        let verdict = check_git(
            r#"git commit -m "feat(#1): add x""#,
            &GitPolicy::default(),
            Some("main"),
        );
        assert!(matches!(verdict, Verdict::Advisory { .. }));
        let verdict = check_git(
            r#"git commit -m "feat(#1): add x""#,
            &GitPolicy::default(),
            Some("feature/x"),
        );
        assert!(verdict.is_allow());
    }

    #[test]
    fn push_to_protected_branch_is_advisory() {
        assert!(matches!(
            check("git push origin main"),
            Verdict::Advisory { .. }
        ));
        assert!(matches!(
            check("git push -u origin HEAD:master"),
            Verdict::Advisory { .. }
        ));
        assert!(check("git push origin feature/x").is_allow());
        assert!(check("git push origin Main").is_allow());
    }
}

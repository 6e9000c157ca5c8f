//! Declarative rule registry shared by the pattern-based checkers.
//!
//! Every table is an ordered list of typed records and the first matching
//! entry decides. Patterns are compiled once, case-insensitively, when the
//! registry is built; checkers receive the registry by reference.

use std::fmt;

use anyhow::{Context, Result};
use regex::{Regex, RegexBuilder};
use serde::Serialize;

use crate::core::browser::is_remote_host;
use crate::core::compound::{brace_in_command_position, has_nested_substitution};
use crate::core::types::Verdict;

/// Bumped whenever a table changes meaning (added, removed or reordered rules).
pub const RULESET_VERSION: u32 = 3;

/// Rule id whose pattern depends on [`RulePolicy::force_with_lease_is_force`].
pub const GIT_FORCE_PUSH: &str = "git-force-push";

const FORCE_PUSH_ANY: &str = r"\bgit\s+push\b.*\s(?:--force\b|-f(?:\s|$))";
const FORCE_PUSH_PLAIN: &str = r"\bgit\s+push\b.*\s(?:--force(?:\s|$)|-f(?:\s|$))";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Deny the invocation.
    Block,
    /// Allow with an advisory.
    Warn,
    /// Allow unconditionally; used to carve exceptions out of later entries.
    Exempt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleCategory {
    Filesystem,
    Device,
    ProcessBomb,
    Git,
    RemoteExecution,
    Database,
    ShellFeature,
    Credentials,
    Production,
    Rollback,
    Infrastructure,
    Navigation,
}

/// Structural confirmation run after the pattern matched.
pub type Refinement = fn(&str) -> bool;

struct RuleDef {
    id: &'static str,
    pattern: &'static str,
    severity: Severity,
    category: RuleCategory,
    message: &'static str,
    refine: Option<Refinement>,
}

const fn rule(
    id: &'static str,
    pattern: &'static str,
    severity: Severity,
    category: RuleCategory,
    message: &'static str,
) -> RuleDef {
    RuleDef {
        id,
        pattern,
        severity,
        category,
        message,
        refine: None,
    }
}

const fn refined(
    id: &'static str,
    pattern: &'static str,
    severity: Severity,
    category: RuleCategory,
    message: &'static str,
    refine: Refinement,
) -> RuleDef {
    RuleDef {
        id,
        pattern,
        severity,
        category,
        message,
        refine: Some(refine),
    }
}

use RuleCategory as C;
use Severity as S;

const DANGEROUS_COMMANDS: &[RuleDef] = &[
    rule(
        "rm-root-or-home",
        r#"\brm\s+(?:-[a-z-]+\s+)*(?:-[a-z]*r[a-z]*|--recursive)\s+(?:-[a-z-]+\s+)*['"]?(?:/|/\*|~|~/|~/\*|\$home|\$home/|\$home/\*|\$\{home\}|\$\{home\}/|\$\{home\}/\*)['"]?(?:\s|$|[;&|])"#,
        S::Block,
        C::Filesystem,
        "Recursive delete of the filesystem root or home directory",
    ),
    rule(
        "dd-raw-device",
        r"\bdd\b.*\bof=/dev/(?:sd|hd|nvme|xvd|vd|disk|mmcblk)",
        S::Block,
        C::Device,
        "Raw write to a block device",
    ),
    rule(
        "redirect-raw-device",
        r">\s*/dev/(?:sd[a-z]|hd[a-z]|nvme\d|xvd[a-z]|vd[a-z]|disk\d|mmcblk\d)",
        S::Block,
        C::Device,
        "Redirecting output onto a block device",
    ),
    rule(
        "mkfs",
        r"\bmkfs(?:\.[a-z0-9]+)?\b",
        S::Block,
        C::Device,
        "Formatting a filesystem",
    ),
    rule(
        "fork-bomb",
        r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:",
        S::Block,
        C::ProcessBomb,
        "Fork bomb",
    ),
    rule(
        "chmod-root-world-writable",
        r"\bchmod\s+(?:-[a-z]+\s+)*-[a-z]*r[a-z]*\s+(?:0?777|a\+rwx)\s+/(?:\s|$)",
        S::Block,
        C::Filesystem,
        "Recursively making the filesystem root world-writable",
    ),
    rule(
        GIT_FORCE_PUSH,
        FORCE_PUSH_ANY,
        S::Block,
        C::Git,
        "Force push rewrites shared history",
    ),
    rule(
        "git-delete-protected-remote",
        r"\bgit\s+push\s+\S+\s+(?:--delete\s+|:)(?:main|master)\b",
        S::Block,
        C::Git,
        "Deleting a protected branch on the remote",
    ),
    rule(
        "download-pipe-shell",
        r"\b(?:curl|wget)\b[^|]*\|\s*(?:sudo\s+)?(?:ba|z|k|da|fi)?sh\b",
        S::Block,
        C::RemoteExecution,
        "Piping a download straight into a shell",
    ),
    rule(
        "shell-eval-download",
        r#"\b(?:bash|sh|zsh)\s+(?:-c\s+)?['"]?\$\(\s*(?:curl|wget)\b"#,
        S::Block,
        C::RemoteExecution,
        "Executing downloaded code through a shell",
    ),
    rule(
        "sql-drop",
        r"\bdrop\s+(?:database|schema|table)\b",
        S::Block,
        C::Database,
        "Destructive SQL: DROP",
    ),
    rule(
        "sql-truncate",
        r"\btruncate\s+table\b",
        S::Block,
        C::Database,
        "Destructive SQL: TRUNCATE TABLE",
    ),
    rule(
        "sql-delete-without-where",
        r#"\bdelete\s+from\s+[\w.]+\s*(?:;|$|['"])"#,
        S::Block,
        C::Database,
        "Destructive SQL: DELETE without WHERE",
    ),
];

const SHELL_FEATURES: &[RuleDef] = &[
    rule(
        "process-substitution",
        r"[<>]\(",
        S::Block,
        C::ShellFeature,
        "Process substitution hides the executed command from review",
    ),
    rule(
        "ifs-manipulation",
        r"\bIFS\s*=",
        S::Block,
        C::ShellFeature,
        "IFS manipulation changes how the shell splits words",
    ),
    refined(
        "brace-command-list",
        r"\{[^{}\s]*,[^{}\s]*\}",
        S::Block,
        C::ShellFeature,
        "Brace expansion in command position runs its first element as a command",
        brace_in_command_position,
    ),
    refined(
        "nested-substitution",
        r"\$\(.*(?:\$\(|`)",
        S::Warn,
        C::ShellFeature,
        "Nested command substitution is hard to review",
        has_nested_substitution,
    ),
];

const PROTECTED_PATHS: &[RuleDef] = &[
    rule(
        "env-template-exempt",
        r"(?:^|/)\.env\.(?:example|sample|template)$",
        S::Exempt,
        C::Credentials,
        "Environment templates carry no secrets",
    ),
    rule(
        "public-key-exempt",
        r"\.pub$",
        S::Exempt,
        C::Credentials,
        "Public keys are not secret",
    ),
    rule(
        "env-file",
        r"(?:^|/)\.env(?:\.[^/]+)?$",
        S::Block,
        C::Credentials,
        "environment files hold secrets",
    ),
    rule(
        "credentials-json",
        r"(?:^|/)credentials\.json$",
        S::Block,
        C::Credentials,
        "credential stores must not be edited by the agent",
    ),
    rule(
        "secrets-json",
        r"(?:^|/)secrets\.json$",
        S::Block,
        C::Credentials,
        "secret stores must not be edited by the agent",
    ),
    rule(
        "pem-file",
        r"\.pem$",
        S::Block,
        C::Credentials,
        "PEM files hold private keys or certificates",
    ),
    rule(
        "private-key",
        r"(?:^|/)private\.key$",
        S::Block,
        C::Credentials,
        "private key material",
    ),
    rule(
        "ssh-private-key",
        r"(?:^|/)id_(?:rsa|ed25519|ecdsa|dsa)$",
        S::Block,
        C::Credentials,
        "SSH private key",
    ),
];

/// `release` counts only as a command, script or subcommand name, never as
/// a flag such as `--release` or a branch such as `release/1.4`.
const DEPLOYMENT_CONTEXT: &str = r"(?:^|[\s;&|(/])release(?:\.\w+)?(?:$|[\s;&|)])|\b(?:deploy\w*|kubectl|helm|terraform|pulumi|cdk|serverless|sls|vercel|netlify|flyctl|heroku|ansible-playbook|gcloud|aws|az)\b|\bdocker\s+push\b|\b[a-z_]*env(?:ironment)?\s*=|--(?:env|environment|stage)\b";

const PRODUCTION_TARGETS: &[RuleDef] = &[
    rule(
        "env-assign-production",
        r#"\b[a-z_]*env(?:ironment)?\s*=\s*['"]?prod(?:uction)?\b"#,
        S::Block,
        C::Production,
        "Environment variable selects production",
    ),
    rule(
        "env-flag-production",
        r#"--(?:env|environment|stage|target)(?:=|\s+)['"]?prod(?:uction)?\b"#,
        S::Block,
        C::Production,
        "Deployment flag targets production",
    ),
    rule(
        "production-literal",
        r"\bproduction\b",
        S::Block,
        C::Production,
        "Command targets production",
    ),
    rule(
        "prod-word",
        r"\bprod\b",
        S::Block,
        C::Production,
        "Command targets prod",
    ),
    rule(
        "deploy-protected-branch",
        r"(?:\bdeploy\w*\b|(?:^|[\s;&|(/])release(?:\.\w+)?(?:$|[\s;&|)])).*\b(?:main|master)\b",
        S::Block,
        C::Production,
        "Deploying from main/master goes straight to production",
    ),
];

const DEPLOYMENT_ADVISORIES: &[RuleDef] = &[
    rule(
        "rollback",
        r"\b(?:rollback|roll\s+back|downgrade|rollout\s+undo)\b",
        S::Warn,
        C::Rollback,
        "Rollback/downgrade: confirm the target version and data compatibility",
    ),
    rule(
        "terraform-apply",
        r"\bterraform\s+apply\b",
        S::Warn,
        C::Infrastructure,
        "terraform apply changes live infrastructure; review the plan first",
    ),
    rule(
        "kubectl-apply",
        r"\bkubectl\s+apply\b",
        S::Warn,
        C::Infrastructure,
        "kubectl apply changes cluster state; check the current context",
    ),
    rule(
        "helm-upgrade",
        r"\bhelm\s+(?:upgrade|install)\b",
        S::Warn,
        C::Infrastructure,
        "helm upgrade/install changes a release; check the target namespace",
    ),
    rule(
        "docker-push",
        r"\bdocker\s+push\b",
        S::Warn,
        C::Infrastructure,
        "docker push publishes an image; check the tag",
    ),
];

const NAVIGATION: &[RuleDef] = &[
    rule(
        "script-url-scheme",
        r"^\s*(?:javascript|data|vbscript|file):",
        S::Block,
        C::Navigation,
        "URL scheme can execute code or read local files",
    ),
    rule(
        "cloud-metadata-host",
        r"^[a-z][a-z0-9+.-]*://(?:[^/@]*@)?(?:169\.254\.169\.254|metadata\.google\.internal|100\.100\.100\.200|\[fd00:ec2::254\])(?:[:/?#]|$)",
        S::Block,
        C::Navigation,
        "Cloud metadata endpoints expose instance credentials",
    ),
    refined(
        "plain-http",
        r"^http://",
        S::Warn,
        C::Navigation,
        "Unencrypted HTTP to a remote host",
        is_remote_host,
    ),
];

/// Knobs that change how rules compile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RulePolicy {
    /// Whether `--force-with-lease` is treated like `--force`.
    pub force_with_lease_is_force: bool,
}

impl Default for RulePolicy {
    fn default() -> Self {
        Self {
            force_with_lease_is_force: true,
        }
    }
}

/// One compiled rule.
#[derive(Clone)]
pub struct RuleEntry {
    pub id: &'static str,
    pub pattern: Regex,
    pub severity: Severity,
    pub category: RuleCategory,
    pub message: &'static str,
    refine: Option<Refinement>,
}

impl fmt::Debug for RuleEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleEntry")
            .field("id", &self.id)
            .field("pattern", &self.pattern.as_str())
            .field("severity", &self.severity)
            .field("category", &self.category)
            .finish_non_exhaustive()
    }
}

impl RuleEntry {
    fn compile(def: &RuleDef, pattern: &str) -> Result<Self> {
        let compiled = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .with_context(|| format!("compile rule {}", def.id))?;
        Ok(Self {
            id: def.id,
            pattern: compiled,
            severity: def.severity,
            category: def.category,
            message: def.message,
            refine: def.refine,
        })
    }

    /// Pattern source, surfaced in deny reasons for auditing.
    pub fn source(&self) -> &str {
        self.pattern.as_str()
    }

    pub fn matches(&self, text: &str) -> bool {
        self.pattern.is_match(text) && self.refine.is_none_or(|refine| refine(text))
    }

    /// Verdict this rule produces for `subject`.
    pub fn verdict(&self, subject: &str) -> Verdict {
        match self.severity {
            Severity::Block => Verdict::deny(
                format!(
                    "BLOCKED: {}\nRule: {} (pattern: {})\nInput: {}",
                    self.message,
                    self.id,
                    self.source(),
                    subject
                ),
                Some(self.id),
            ),
            Severity::Warn => Verdict::advisory(format!("WARNING: {} [{}]", self.message, self.id)),
            Severity::Exempt => Verdict::allow(),
        }
    }
}

/// All compiled rule tables, in evaluation order.
#[derive(Debug, Clone)]
pub struct RuleRegistry {
    pub version: u32,
    pub dangerous_commands: Vec<RuleEntry>,
    pub shell_features: Vec<RuleEntry>,
    pub protected_paths: Vec<RuleEntry>,
    pub production_targets: Vec<RuleEntry>,
    pub deployment_advisories: Vec<RuleEntry>,
    pub navigation: Vec<RuleEntry>,
    pub deployment_context: Regex,
}

impl RuleRegistry {
    pub fn new(policy: &RulePolicy) -> Result<Self> {
        let dangerous_commands = DANGEROUS_COMMANDS
            .iter()
            .map(|def| {
                let pattern = if def.id == GIT_FORCE_PUSH && !policy.force_with_lease_is_force {
                    FORCE_PUSH_PLAIN
                } else {
                    def.pattern
                };
                RuleEntry::compile(def, pattern)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            version: RULESET_VERSION,
            dangerous_commands,
            shell_features: compile_table(SHELL_FEATURES)?,
            protected_paths: compile_table(PROTECTED_PATHS)?,
            production_targets: compile_table(PRODUCTION_TARGETS)?,
            deployment_advisories: compile_table(DEPLOYMENT_ADVISORIES)?,
            navigation: compile_table(NAVIGATION)?,
            deployment_context: RegexBuilder::new(DEPLOYMENT_CONTEXT)
                .case_insensitive(true)
                .build()
                .context("compile deployment context")?,
        })
    }

    /// First entry of `table` matching `text`.
    pub fn first_match<'a>(table: &'a [RuleEntry], text: &str) -> Option<&'a RuleEntry> {
        table.iter().find(|rule| rule.matches(text))
    }

    /// Named tables in evaluation order (for listing and scanning).
    pub fn tables(&self) -> Vec<(&'static str, &[RuleEntry])> {
        vec![
            ("dangerous_commands", self.dangerous_commands.as_slice()),
            ("shell_features", self.shell_features.as_slice()),
            ("protected_paths", self.protected_paths.as_slice()),
            ("production_targets", self.production_targets.as_slice()),
            ("deployment_advisories", self.deployment_advisories.as_slice()),
            ("navigation", self.navigation.as_slice()),
        ]
    }
}

fn compile_table(defs: &[RuleDef]) -> Result<Vec<RuleEntry>> {
    defs
        .iter()
        .map(|def| RuleEntry::compile(def, def.pattern))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn builtin_registry_compiles() {
        let registry = RuleRegistry::new(&RulePolicy::default()).expect("registry");
        assert_eq!(registry.version, RULESET_VERSION);
        assert!(!registry.dangerous_commands.is_empty());
        assert_eq!(registry.tables().len(), 6);
    }

    #[test]
    fn rule_ids_are_unique() {
        let registry = RuleRegistry::new(&RulePolicy::default()).expect("registry");
        let mut seen = HashSet::new();
        for (_, table) in registry.tables() {
            for rule in table {
                assert!(seen.insert(rule.id), "duplicate rule id {}", rule.id);
            }
        }
    }

    #[test]
    fn force_with_lease_follows_policy() {
        let strict = RuleRegistry::new(&RulePolicy::default()).expect("strict");
        let relaxed = RuleRegistry::new(&RulePolicy {
            force_with_lease_is_force: false,
        })
        .expect("relaxed");
        let lease = "git push --force-with-lease origin feature/x";
        let force = "git push --force origin feature/x";

        let hit = |registry: &RuleRegistry, text: &str| {
            RuleRegistry::first_match(&registry.dangerous_commands, text).map(|rule| rule.id)
        };
        assert_eq!(hit(&strict, lease), Some(GIT_FORCE_PUSH));
        assert_eq!(hit(&relaxed, lease), None);
        assert_eq!(hit(&relaxed, force), Some(GIT_FORCE_PUSH));
        assert_eq!(hit(&relaxed, "git push -f origin x"), Some(GIT_FORCE_PUSH));
    }

    #[test]
    fn exemptions_precede_blocks() {
        let registry = RuleRegistry::new(&RulePolicy::default()).expect("registry");
        let rule = RuleRegistry::first_match(&registry.protected_paths, "keys/id_rsa.pub")
            .expect("match");
        assert_eq!(rule.severity, Severity::Exempt);
        let rule = RuleRegistry::first_match(&registry.protected_paths, "app/.env.example")
            .expect("match");
        assert_eq!(rule.severity, Severity::Exempt);
    }

    #[test]
    fn block_verdict_names_rule_and_pattern() {
        let registry = RuleRegistry::new(&RulePolicy::default()).expect("registry");
        let rule = RuleRegistry::first_match(&registry.dangerous_commands, "mkfs.ext4 /dev/sda1")
            .expect("match");
        match rule.verdict("mkfs.ext4 /dev/sda1") {
            Verdict::Deny { reason, rule } => {
                assert!(reason.contains("mkfs"));
                assert!(reason.contains("pattern:"));
                assert_eq!(rule.as_deref(), Some("mkfs"));
            }
            other => panic!("expected deny, got {other:?}"),
        }
    }
}

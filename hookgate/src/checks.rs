//! Pre-action checkers and their registration order.
//!
//! The [`Checker`] trait decouples the dispatcher from the individual
//! policies so tests can register fakes. Each checker owns what it needs
//! (compiled rules, store paths, identity) and reads nothing global.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::core::browser::check_navigation;
use crate::core::compound::check_compound;
use crate::core::dangerous::check_dangerous;
use crate::core::deploy::check_deployment;
use crate::core::file_guard::check_protected_path;
use crate::core::git_policy::{GitPolicy, check_git};
use crate::core::rules::RuleRegistry;
use crate::core::timeout::inject_default_timeout;
use crate::core::types::{InvocationContext, ToolKind, Verdict};
use crate::io::audit::{AuditRecord, append_audit};
use crate::io::git::GitCheckout;
use crate::io::locks::LockStore;
use crate::io::paths::ProjectPaths;
use crate::settings::Settings;

/// One policy evaluated before a tool call.
pub trait Checker: Send + Sync {
    fn name(&self) -> &'static str;

    fn applies_to(&self, tool: &ToolKind) -> bool;

    /// Evaluate the invocation. An `Err` is treated as `Allow` by the dispatcher.
    fn evaluate(&self, ctx: &InvocationContext) -> Result<Verdict>;
}

/// Source of the checked-out branch for the git validator.
pub trait BranchProbe: Send + Sync {
    fn current_branch(&self) -> Option<String>;
}

impl BranchProbe for GitCheckout {
    fn current_branch(&self) -> Option<String> {
        match self.branch() {
            Ok(branch) => branch,
            Err(err) => {
                debug!(err = %err, "branch probe failed");
                None
            }
        }
    }
}

/// The pre-action checkers in evaluation order.
pub fn pre_action_checkers(
    settings: &Settings,
    paths: &ProjectPaths,
    now: DateTime<Utc>,
) -> Vec<Box<dyn Checker>> {
    vec![
        Box::new(SecurityAudit {
            log_path: paths.security_audit_log(),
            agent_id: settings.env.agent_id.clone(),
            now,
        }),
        Box::new(DangerousCommands {
            rules: Arc::clone(&settings.rules),
        }),
        Box::new(CompoundCommands {
            rules: Arc::clone(&settings.rules),
        }),
        Box::new(GitValidator {
            policy: Arc::clone(&settings.git_policy),
            probe: Box::new(GitCheckout::new(paths.root())),
        }),
        Box::new(DeploymentSafety {
            rules: Arc::clone(&settings.rules),
        }),
        Box::new(FileGuard {
            rules: Arc::clone(&settings.rules),
        }),
        Box::new(MultiInstanceLock {
            store: LockStore::new(paths.locks()),
            instance_id: settings.env.instance_id.clone(),
            now,
        }),
        Box::new(BrowserNavigation {
            rules: Arc::clone(&settings.rules),
        }),
        Box::new(DefaultTimeout {
            timeout_ms: settings.config.timeout.default_ms,
        }),
    ]
}

/// Appends every shell command to the audit log. Never blocks.
pub struct SecurityAudit {
    pub log_path: PathBuf,
    pub agent_id: String,
    pub now: DateTime<Utc>,
}

impl Checker for SecurityAudit {
    fn name(&self) -> &'static str {
        "security-audit"
    }

    fn applies_to(&self, tool: &ToolKind) -> bool {
        matches!(tool, ToolKind::Bash)
    }

    fn evaluate(&self, ctx: &InvocationContext) -> Result<Verdict> {
        let Some(command) = ctx.command().filter(|c| !c.trim().is_empty()) else {
            return Ok(Verdict::allow());
        };
        let record = AuditRecord {
            timestamp: self.now,
            session_id: ctx.session_id.clone(),
            agent_id: self.agent_id.clone(),
            command: command.to_string(),
        };
        if let Err(err) = append_audit(&self.log_path, &record) {
            warn!(checker = self.name(), err = %format!("{err:#}"), "audit append failed");
        }
        Ok(Verdict::allow())
    }
}

pub struct DangerousCommands {
    pub rules: Arc<RuleRegistry>,
}

impl Checker for DangerousCommands {
    fn name(&self) -> &'static str {
        "dangerous-command"
    }

    fn applies_to(&self, tool: &ToolKind) -> bool {
        matches!(tool, ToolKind::Bash)
    }

    fn evaluate(&self, ctx: &InvocationContext) -> Result<Verdict> {
        Ok(ctx
            .command()
            .map_or_else(Verdict::allow, |command| check_dangerous(command, &self.rules)))
    }
}

pub struct CompoundCommands {
    pub rules: Arc<RuleRegistry>,
}

impl Checker for CompoundCommands {
    fn name(&self) -> &'static str {
        "compound-command"
    }

    fn applies_to(&self, tool: &ToolKind) -> bool {
        matches!(tool, ToolKind::Bash)
    }

    fn evaluate(&self, ctx: &InvocationContext) -> Result<Verdict> {
        Ok(ctx
            .command()
            .map_or_else(Verdict::allow, |command| check_compound(command, &self.rules)))
    }
}

pub struct GitValidator {
    pub policy: Arc<GitPolicy>,
    pub probe: Box<dyn BranchProbe>,
}

impl Checker for GitValidator {
    fn name(&self) -> &'static str {
        "git"
    }

    fn applies_to(&self, tool: &ToolKind) -> bool {
        matches!(tool, ToolKind::Bash)
    }

    fn evaluate(&self, ctx: &InvocationContext) -> Result<Verdict> {
        let Some(command) = ctx.command() else {
            return Ok(Verdict::allow());
        };
        if !command.contains("git") {
            return Ok(Verdict::allow());
        }
        let branch = if command.contains("commit") {
            self.probe.current_branch()
        } else {
            None
        };
        Ok(check_git(command, &self.policy, branch.as_deref()))
    }
}

pub struct DeploymentSafety {
    pub rules: Arc<RuleRegistry>,
}

impl Checker for DeploymentSafety {
    fn name(&self) -> &'static str {
        "deployment-safety"
    }

    fn applies_to(&self, tool: &ToolKind) -> bool {
        matches!(tool, ToolKind::Bash)
    }

    fn evaluate(&self, ctx: &InvocationContext) -> Result<Verdict> {
        Ok(ctx
            .command()
            .map_or_else(Verdict::allow, |command| check_deployment(command, &self.rules)))
    }
}

pub struct FileGuard {
    pub rules: Arc<RuleRegistry>,
}

impl Checker for FileGuard {
    fn name(&self) -> &'static str {
        "file-guard"
    }

    fn applies_to(&self, tool: &ToolKind) -> bool {
        tool.is_file_mutation()
    }

    fn evaluate(&self, ctx: &InvocationContext) -> Result<Verdict> {
        Ok(ctx
            .file_path()
            .map_or_else(Verdict::allow, |path| check_protected_path(path, &self.rules)))
    }
}

/// Denies writes to a path another live instance holds a lock on.
pub struct MultiInstanceLock {
    pub store: LockStore,
    pub instance_id: String,
    pub now: DateTime<Utc>,
}

impl Checker for MultiInstanceLock {
    fn name(&self) -> &'static str {
        "multi-instance-lock"
    }

    fn applies_to(&self, tool: &ToolKind) -> bool {
        tool.is_file_mutation()
    }

    fn evaluate(&self, ctx: &InvocationContext) -> Result<Verdict> {
        let Some(path) = ctx.file_path() else {
            return Ok(Verdict::allow());
        };
        let relative = ctx.project_relative(path);
        let Some(lock) = self.store.conflict_for(&relative, &self.instance_id, self.now)? else {
            return Ok(Verdict::allow());
        };
        Ok(Verdict::deny(
            format!(
                "BLOCKED: '{}' is locked by instance '{}' (acquired {}, expires {}).\nWait for the lock to expire or coordinate with that instance.",
                relative,
                lock.owner_instance_id,
                lock.acquired_at.to_rfc3339(),
                lock.expires_at.to_rfc3339()
            ),
            Some("file-locked"),
        ))
    }
}

pub struct BrowserNavigation {
    pub rules: Arc<RuleRegistry>,
}

impl Checker for BrowserNavigation {
    fn name(&self) -> &'static str {
        "browser-navigation"
    }

    fn applies_to(&self, tool: &ToolKind) -> bool {
        matches!(tool, ToolKind::BrowserNavigate)
    }

    fn evaluate(&self, ctx: &InvocationContext) -> Result<Verdict> {
        Ok(ctx
            .url()
            .map_or_else(Verdict::allow, |url| check_navigation(url, &self.rules)))
    }
}

pub struct DefaultTimeout {
    pub timeout_ms: u64,
}

impl Checker for DefaultTimeout {
    fn name(&self) -> &'static str {
        "default-timeout"
    }

    fn applies_to(&self, tool: &ToolKind) -> bool {
        matches!(tool, ToolKind::Bash)
    }

    fn evaluate(&self, ctx: &InvocationContext) -> Result<Verdict> {
        Ok(inject_default_timeout(&ctx.tool_input, self.timeout_ms))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use serde_json::json;

    use super::*;
    use crate::io::audit::read_audit;
    use crate::io::locks::LockType;
    use crate::test_support::{TestProject, ctx};

    struct FixedBranch(Option<&'static str>);

    impl BranchProbe for FixedBranch {
        fn current_branch(&self) -> Option<String> {
            self.0.map(str::to_string)
        }
    }

    #[test]
    fn registration_order_is_stable() {
        let project = TestProject::new();
        let names: Vec<_> = pre_action_checkers(&project.settings(), &project.paths(), Utc::now())
            .iter()
            .map(|c| c.name())
            .collect();
        assert_eq!(
            names,
            [
                "security-audit",
                "dangerous-command",
                "compound-command",
                "git",
                "deployment-safety",
                "file-guard",
                "multi-instance-lock",
                "browser-navigation",
                "default-timeout",
            ]
        );
    }

    #[test]
    fn audit_skips_empty_commands_and_records_others() {
        let project = TestProject::new();
        let checker = SecurityAudit {
            log_path: project.paths().security_audit_log(),
            agent_id: "agent-1".to_string(),
            now: Utc::now(),
        };
        let root = project.root();
        checker
            .evaluate(&ctx(ToolKind::Bash, json!({"command": "  "}), &root))
            .expect("empty");
        checker
            .evaluate(&ctx(ToolKind::Bash, json!({}), &root))
            .expect("missing");
        assert!(!project.paths().security_audit_log().exists());

        let verdict = checker
            .evaluate(&ctx(ToolKind::Bash, json!({"command": "rm -rf /"}), &root))
            .expect("audit");
        assert!(verdict.is_allow());
        let records = read_audit(&project.paths().security_audit_log());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].agent_id, "agent-1");
        assert_eq!(records[0].session_id, "session-1");
    }

    #[test]
    fn git_validator_probes_branch_only_for_commits() {
        let checker = GitValidator {
            policy: Arc::new(GitPolicy::default()),
            probe: Box::new(FixedBranch(Some("main"))),
        };
        let root = PathBuf::from("/project");
        let commit = ctx(
            ToolKind::Bash,
            json!({"command": "git commit -m \"feat(#1): add x\""}),
            &root,
        );
        assert!(matches!(
            checker.evaluate(&commit).expect("commit"),
            Verdict::Advisory { .. }
        ));
        let status = ctx(ToolKind::Bash, json!({"command": "git status"}), &root);
        assert!(checker.evaluate(&status).expect("status").is_allow());
    }

    #[test]
    fn lock_checker_denies_other_instances_only() {
        let project = TestProject::new();
        let store = LockStore::new(project.paths().locks());
        store.init(false).expect("init");
        let now = Utc::now();
        store
            .acquire("src/app.ts", "A", LockType::Write, Duration::minutes(5), now)
            .expect("acquire");

        let root = project.root();
        let write = ctx(
            ToolKind::Write,
            json!({"file_path": root.join("src/app.ts").to_string_lossy(), "content": "x"}),
            &root,
        );
        let checker_for = |instance: &str, at: DateTime<Utc>| MultiInstanceLock {
            store: LockStore::new(project.paths().locks()),
            instance_id: instance.to_string(),
            now: at,
        };

        match checker_for("B", now).evaluate(&write).expect("B") {
            Verdict::Deny { reason, rule } => {
                assert!(reason.contains("'A'"));
                assert_eq!(rule.as_deref(), Some("file-locked"));
            }
            other => panic!("expected deny, got {other:?}"),
        }
        assert!(checker_for("A", now).evaluate(&write).expect("A").is_allow());
        assert!(
            checker_for("B", now + Duration::minutes(6))
                .evaluate(&write)
                .expect("expired")
                .is_allow()
        );
    }

    #[test]
    fn lock_checker_allows_without_store() {
        let project = TestProject::new();
        let checker = MultiInstanceLock {
            store: LockStore::new(project.paths().locks()),
            instance_id: "B".to_string(),
            now: Utc::now(),
        };
        let root = project.root();
        let write = ctx(ToolKind::Edit, json!({"file_path": "src/app.ts"}), &root);
        assert!(checker.evaluate(&write).expect("evaluate").is_allow());
    }

    #[test]
    fn timeout_checker_rewrites_input() {
        let checker = DefaultTimeout { timeout_ms: 1234 };
        let root = PathBuf::from("/project");
        match checker
            .evaluate(&ctx(ToolKind::Bash, json!({"command": "ls"}), &root))
            .expect("evaluate")
        {
            Verdict::Allow {
                updated_input: Some(input),
            } => assert_eq!(input.get("timeout"), Some(&json!(1234))),
            other => panic!("expected rewrite, got {other:?}"),
        }
    }
}

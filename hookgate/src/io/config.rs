//! Gate configuration stored under `.claude/hookgate.toml`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::budget::{ContextBudget, DEFAULT_MAX_CONTEXT_TOKENS};
use crate::core::git_policy::{
    DEFAULT_BRANCH_PREFIXES, DEFAULT_COMMIT_TYPES, DEFAULT_MAX_SUBJECT_LEN,
    DEFAULT_PROTECTED_BRANCHES, GitPolicy,
};
use crate::core::rules::RulePolicy;
use crate::core::timeout::DEFAULT_TIMEOUT_MS;
use crate::io::atomic::write_atomic;
use crate::io::env::HostEnv;

/// Gate configuration (TOML).
///
/// Edited by humans; every field has a default so a partial file is valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct GateConfig {
    pub git: GitConfig,
    pub locks: LockConfig,
    pub timeout: TimeoutConfig,
    pub context: ContextConfig,
    pub finalizers: FinalizerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GitConfig {
    pub commit_types: Vec<String>,
    /// Require `(#issue)` or `(scope)` after the commit type.
    pub require_scope: bool,
    pub branch_prefixes: Vec<String>,
    /// Matched by exact, case-sensitive equality.
    pub protected_branches: Vec<String>,
    pub max_subject_len: usize,
    /// Treat `git push --force-with-lease` like `--force`.
    pub force_with_lease_is_force: bool,
}

impl Default for GitConfig {
    fn default() -> Self {
        let owned = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        Self {
            commit_types: owned(DEFAULT_COMMIT_TYPES),
            require_scope: true,
            branch_prefixes: owned(DEFAULT_BRANCH_PREFIXES),
            protected_branches: owned(DEFAULT_PROTECTED_BRANCHES),
            max_subject_len: DEFAULT_MAX_SUBJECT_LEN,
            force_with_lease_is_force: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LockConfig {
    /// Lifetime of a lock acquired after a file mutation.
    pub ttl_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self { ttl_secs: 5 * 60 }
    }
}

/// Upper bound for `locks.ttl_secs` (one week).
pub const MAX_LOCK_TTL_SECS: u64 = 7 * 24 * 60 * 60;

impl LockConfig {
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.ttl_secs.min(MAX_LOCK_TTL_SECS) as i64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Injected into shell invocations that carry no `timeout`.
    pub default_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            default_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ContextConfig {
    /// Overridden by `HOOKGATE_MAX_CONTEXT_TOKENS`.
    pub max_context_tokens: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: DEFAULT_MAX_CONTEXT_TOKENS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FinalizerConfig {
    /// Queues older than this are cleared instead of synced.
    pub queue_max_age_secs: u64,
    /// `decisions.jsonl` is archived once it is older than this.
    pub decision_archive_age_secs: u64,
    /// Test command run at session end (e.g. `["cargo", "test"]`). Empty disables.
    pub test_command: Vec<String>,
    pub test_timeout_secs: u64,
    pub test_output_limit_bytes: usize,
}

impl Default for FinalizerConfig {
    fn default() -> Self {
        Self {
            queue_max_age_secs: 7 * 24 * 60 * 60,
            decision_archive_age_secs: 24 * 60 * 60,
            test_command: Vec::new(),
            test_timeout_secs: 5 * 60,
            test_output_limit_bytes: 100_000,
        }
    }
}

impl GateConfig {
    pub fn validate(&self) -> Result<()> {
        if self.git.commit_types.is_empty()
            || self.git.commit_types.iter().any(|t| t.trim().is_empty())
        {
            return Err(anyhow!("git.commit_types must be a non-empty list of names"));
        }
        if self.git.max_subject_len == 0 {
            return Err(anyhow!("git.max_subject_len must be > 0"));
        }
        if self.locks.ttl_secs == 0 || self.locks.ttl_secs > MAX_LOCK_TTL_SECS {
            return Err(anyhow!(
                "locks.ttl_secs must be between 1 and {MAX_LOCK_TTL_SECS}"
            ));
        }
        if self.timeout.default_ms == 0 {
            return Err(anyhow!("timeout.default_ms must be > 0"));
        }
        if self.context.max_context_tokens == 0 {
            return Err(anyhow!("context.max_context_tokens must be > 0"));
        }
        if self.finalizers.test_timeout_secs == 0 {
            return Err(anyhow!("finalizers.test_timeout_secs must be > 0"));
        }
        if self.finalizers.test_output_limit_bytes == 0 {
            return Err(anyhow!("finalizers.test_output_limit_bytes must be > 0"));
        }
        if self
            .finalizers
            .test_command
            .first()
            .is_some_and(|program| program.trim().is_empty())
        {
            return Err(anyhow!("finalizers.test_command must start with a program"));
        }
        Ok(())
    }

    pub fn rule_policy(&self) -> RulePolicy {
        RulePolicy {
            force_with_lease_is_force: self.git.force_with_lease_is_force,
        }
    }

    pub fn git_policy(&self) -> Result<GitPolicy> {
        GitPolicy::new(
            &self.git.commit_types,
            self.git.require_scope,
            &self.git.branch_prefixes,
            &self.git.protected_branches,
            self.git.max_subject_len,
        )
    }

    /// Budget with the environment override applied.
    pub fn context_budget(&self, env: &HostEnv) -> ContextBudget {
        ContextBudget::new(
            env.max_context_tokens
                .unwrap_or(self.context.max_context_tokens),
        )
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `GateConfig::default()`.
pub fn load_config(path: &Path) -> Result<GateConfig> {
    if !path.exists() {
        let cfg = GateConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: GateConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Project config, then the global config, then defaults.
pub fn load_layered(project_config: &Path, global_config: &Path) -> Result<GateConfig> {
    for path in [project_config, global_config] {
        if path.exists() {
            debug!(path = %path.display(), "loading config");
            return load_config(path);
        }
    }
    load_config(project_config)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &GateConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

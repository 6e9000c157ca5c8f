//! Composition root for the pre-action, post-action and session-end paths.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::thread;

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use crate::checks::Checker;
use crate::core::types::{InvocationContext, ToolInput, ToolKind, Verdict};
use crate::finalize::Finalizer;
use crate::io::audit::{SkillUsageRecord, append_skill_usage};
use crate::io::locks::{AcquireOutcome, LockStore, LockType};
use crate::io::paths::ProjectPaths;
use crate::settings::Settings;

/// Final pre-action decision.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Proceed. Advisories and an input rewrite are independent of each other.
    Allow {
        advisories: Vec<String>,
        updated_input: Option<ToolInput>,
    },
    Deny {
        checker: &'static str,
        reason: String,
        rule: Option<String>,
    },
}

impl Decision {
    pub fn is_deny(&self) -> bool {
        matches!(self, Self::Deny { .. })
    }

    /// Verdict-equivalent strength: deny > advisory > allow.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Deny { .. } => 2,
            Self::Allow { advisories, .. } if !advisories.is_empty() => 1,
            Self::Allow { .. } => 0,
        }
    }
}

/// Run checkers in registration order, stopping at the first deny.
///
/// A checker that errors or panics is logged and treated as `Allow`.
#[instrument(skip_all, fields(tool = ctx.tool.name()))]
pub fn pre_action(checkers: &[Box<dyn Checker>], ctx: &InvocationContext) -> Decision {
    let mut advisories = Vec::new();
    let mut updated_input: Option<ToolInput> = None;

    for checker in checkers {
        if !checker.applies_to(&ctx.tool) {
            continue;
        }
        let verdict = match guarded(checker.name(), || checker.evaluate(ctx)) {
            Ok(verdict) => verdict,
            Err(err) => {
                warn!(checker = checker.name(), err = %format!("{err:#}"), "checker failed, allowing");
                Verdict::allow()
            }
        };
        debug!(checker = checker.name(), rank = verdict.rank(), "checker evaluated");
        match verdict {
            Verdict::Deny { reason, rule } => {
                info!(checker = checker.name(), rule = ?rule, "denied");
                return Decision::Deny {
                    checker: checker.name(),
                    reason,
                    rule,
                };
            }
            Verdict::Advisory { message } => advisories.push(message),
            Verdict::Allow {
                updated_input: Some(input),
            } => updated_input = Some(input),
            Verdict::Allow {
                updated_input: None,
            } => {}
        }
    }

    Decision::Allow {
        advisories,
        updated_input,
    }
}

fn guarded<T>(name: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(_) => Err(anyhow!("{name} panicked")),
    }
}

/// Post-action bookkeeping. Never blocks; faults are logged and swallowed.
#[instrument(skip_all, fields(tool = ctx.tool.name()))]
pub fn post_action(
    settings: &Settings,
    paths: &ProjectPaths,
    ctx: &InvocationContext,
    now: DateTime<Utc>,
) {
    let result = match &ctx.tool {
        tool if tool.is_file_mutation() => acquire_lock(settings, paths, ctx, now),
        ToolKind::Skill => record_skill_usage(settings, paths, ctx, now),
        _ => Ok(()),
    };
    if let Err(err) = result {
        warn!(err = %format!("{err:#}"), "post-action bookkeeping failed");
    }
}

fn acquire_lock(
    settings: &Settings,
    paths: &ProjectPaths,
    ctx: &InvocationContext,
    now: DateTime<Utc>,
) -> Result<()> {
    let Some(path) = ctx.file_path() else {
        return Ok(());
    };
    let relative = ctx.project_relative(path);
    let lock_type = match ctx.tool {
        ToolKind::Write => LockType::Write,
        _ => LockType::Edit,
    };
    let ttl = settings.config.locks.ttl();
    let outcome = LockStore::new(paths.locks()).acquire(
        &relative,
        &settings.env.instance_id,
        lock_type,
        ttl,
        now,
    )?;
    match outcome {
        AcquireOutcome::Conflict(lock) => {
            warn!(path = %relative, holder = %lock.owner_instance_id, "lock held by another instance");
        }
        AcquireOutcome::Disabled => debug!("coordination disabled"),
        AcquireOutcome::Acquired(_) | AcquireOutcome::Refreshed(_) => {
            debug!(path = %relative, "lock held");
        }
    }
    Ok(())
}

fn record_skill_usage(
    settings: &Settings,
    paths: &ProjectPaths,
    ctx: &InvocationContext,
    now: DateTime<Utc>,
) -> Result<()> {
    let Some(skill) = ["skill", "name", "command"]
        .iter()
        .find_map(|key| ctx.str_param(key))
        .filter(|s| !s.trim().is_empty())
    else {
        return Ok(());
    };
    append_skill_usage(
        &paths.skill_usage_log(),
        &SkillUsageRecord {
            timestamp: now,
            session_id: ctx.session_id.clone(),
            agent_id: settings.env.agent_id.clone(),
            skill: skill.trim().to_string(),
        },
    )
}

/// Result of a session-end pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionEndSummary {
    /// True when the re-entry guard short-circuited the pass.
    pub reentry_skipped: bool,
    pub ran: usize,
    pub failed: Vec<&'static str>,
}

/// Run every finalizer concurrently with per-finalizer failure isolation.
///
/// Always succeeds; failures are counted and logged by name.
#[instrument(skip_all, fields(session = %ctx.session_id))]
pub fn session_end(finalizers: &[Box<dyn Finalizer>], ctx: &InvocationContext) -> SessionEndSummary {
    if ctx.reentry {
        info!("re-entry detected, skipping finalizers");
        return SessionEndSummary {
            reentry_skipped: true,
            ..SessionEndSummary::default()
        };
    }

    let results: Vec<(&'static str, Result<()>)> = thread::scope(|scope| {
        let handles: Vec<_> = finalizers
            .iter()
            .map(|finalizer| {
                let name = finalizer.name();
                (name, scope.spawn(move || finalizer.run(ctx)))
            })
            .collect();
        handles
            .into_iter()
            .map(|(name, handle)| {
                let result = handle
                    .join()
                    .unwrap_or_else(|_| Err(anyhow!("{name} panicked")));
                (name, result)
            })
            .collect()
    });

    let mut summary = SessionEndSummary {
        ran: results.len(),
        ..SessionEndSummary::default()
    };
    for (name, result) in results {
        if let Err(err) = result {
            warn!(finalizer = name, err = %format!("{err:#}"), "finalizer failed");
            summary.failed.push(name);
        }
    }
    info!(
        ran = summary.ran,
        failed = summary.failed.len(),
        "session-end finalizers complete"
    );
    summary
}

//! Session-end finalizers.
//!
//! Every finalizer is independent: none reads another's output, so the
//! dispatcher runs them concurrently and isolates their failures.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::budget::ContextBudget;
use crate::core::compound::check_compound;
use crate::core::dangerous::check_dangerous;
use crate::core::deploy::check_deployment;
use crate::core::queue::{GraphBatch, GraphOperation, QueueMemory, aggregate, deduplicate_memories};
use crate::core::rules::RuleRegistry;
use crate::core::types::{InvocationContext, Verdict};
use crate::io::audit::{read_audit, read_skill_usage};
use crate::io::context_budget::check_and_compress;
use crate::io::env::REENTRY;
use crate::io::locks::LockStore;
use crate::io::paths::ProjectPaths;
use crate::io::process::{RunLimits, run_bounded};
use crate::io::queue_store::{archive, clear, is_stale, read_queue, write_json};
use crate::io::session_state::touch_session_state;
use crate::settings::Settings;

/// One routine run when a session ends.
pub trait Finalizer: Send + Sync {
    fn name(&self) -> &'static str;

    fn run(&self, ctx: &InvocationContext) -> Result<()>;
}

/// The session-end finalizers.
pub fn session_finalizers(
    settings: &Settings,
    paths: &ProjectPaths,
    now: DateTime<Utc>,
) -> Vec<Box<dyn Finalizer>> {
    let finalizers = &settings.config.finalizers;
    vec![
        Box::new(ContextSave {
            paths: paths.clone(),
            budget: settings.config.context_budget(&settings.env),
            now,
        }),
        Box::new(QueueSync {
            paths: paths.clone(),
            max_age: Duration::from_secs(finalizers.queue_max_age_secs),
            skip: settings.env.skip_sync,
            now,
        }),
        Box::new(DecisionArchive {
            paths: paths.clone(),
            max_age: Duration::from_secs(finalizers.decision_archive_age_secs),
            now,
        }),
        Box::new(TestSuite {
            paths: paths.clone(),
            command: finalizers.test_command.clone(),
            timeout: Duration::from_secs(finalizers.test_timeout_secs),
            output_limit_bytes: finalizers.test_output_limit_bytes,
            skip: settings.env.skip_sync,
            now,
        }),
        Box::new(SecurityScan {
            paths: paths.clone(),
            rules: Arc::clone(&settings.rules),
            now,
        }),
        Box::new(SkillAnalytics {
            paths: paths.clone(),
            now,
        }),
        Box::new(LockRelease {
            store: LockStore::new(paths.locks()),
            instance_id: settings.env.instance_id.clone(),
        }),
    ]
}

/// Create or refresh the session state, then enforce the context budget.
pub struct ContextSave {
    pub paths: ProjectPaths,
    pub budget: ContextBudget,
    pub now: DateTime<Utc>,
}

impl Finalizer for ContextSave {
    fn name(&self) -> &'static str {
        "context-save"
    }

    fn run(&self, ctx: &InvocationContext) -> Result<()> {
        touch_session_state(
            &self.paths.session_state(),
            &self.paths.session_archive_dir(),
            &ctx.session_id,
            self.now,
            self.budget.max_context_tokens,
        )?;
        let check = check_and_compress(&self.paths, &self.budget, self.now)?;
        debug!(
            used_tokens = check.report.used_tokens,
            compressed = check.compressed.is_some(),
            "context saved"
        );
        Ok(())
    }
}

/// Fold the memory queues into pending sync payloads and archive them.
pub struct QueueSync {
    pub paths: ProjectPaths,
    pub max_age: Duration,
    pub skip: bool,
    pub now: DateTime<Utc>,
}

impl QueueSync {
    /// Clear a queue that has sat unsynced for too long. Returns true if cleared.
    fn clear_if_stale(&self, queue: &Path) -> Result<bool> {
        if !is_stale(queue, self.max_age, SystemTime::from(self.now)) {
            return Ok(false);
        }
        let cleared = clear(queue)?;
        info!(path = %queue.display(), "stale queue cleared");
        Ok(cleared)
    }

    fn sync_graph(&self) -> Result<()> {
        let queue = self.paths.graph_queue();
        if !queue.exists() || self.clear_if_stale(&queue)? {
            return Ok(());
        }
        let batch = aggregate(read_queue::<GraphOperation>(&queue));
        if !batch.is_empty() {
            let pending_path = self.paths.graph_pending();
            let mut pending: GraphBatch = read_pending(&pending_path)?.unwrap_or_default();
            pending.entities.extend(batch.entities);
            pending.relations.extend(batch.relations);
            pending.observations.extend(batch.observations);
            write_json(&pending_path, &pending)?;
            info!(pending = pending.len(), "graph operations pending sync");
        }
        archive(&queue, &self.paths.memory_archive_dir(), self.now)?;
        Ok(())
    }

    fn sync_memories(&self) -> Result<()> {
        let queue = self.paths.memory_queue();
        if !queue.exists() || self.clear_if_stale(&queue)? {
            return Ok(());
        }
        let queued = read_queue::<QueueMemory>(&queue);
        if !queued.is_empty() {
            let pending_path = self.paths.memory_pending();
            let mut memories: Vec<QueueMemory> = read_pending(&pending_path)?.unwrap_or_default();
            memories.extend(queued);
            let unique = deduplicate_memories(memories);
            write_json(&pending_path, &unique)?;
            info!(pending = unique.len(), "memories pending sync");
        }
        archive(&queue, &self.paths.memory_archive_dir(), self.now)?;
        Ok(())
    }
}

fn read_pending<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let value =
        serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    Ok(Some(value))
}

impl Finalizer for QueueSync {
    fn name(&self) -> &'static str {
        "queue-sync"
    }

    fn run(&self, _ctx: &InvocationContext) -> Result<()> {
        if self.skip {
            debug!("sync skipped");
            return Ok(());
        }
        let graph = self.sync_graph().context("graph queue");
        let memories = self.sync_memories().context("memory queue");
        graph.and(memories)
    }
}

/// Archive `decisions.jsonl` once it has gone stale.
pub struct DecisionArchive {
    pub paths: ProjectPaths,
    pub max_age: Duration,
    pub now: DateTime<Utc>,
}

impl Finalizer for DecisionArchive {
    fn name(&self) -> &'static str {
        "decision-archive"
    }

    fn run(&self, _ctx: &InvocationContext) -> Result<()> {
        let decisions = self.paths.decisions();
        if !is_stale(&decisions, self.max_age, SystemTime::from(self.now)) {
            return Ok(());
        }
        let outcome = archive(&decisions, &self.paths.memory_archive_dir(), self.now)?;
        info!(outcome = ?outcome, "decisions archived");
        Ok(())
    }
}

/// Run the configured test command with a bounded wall clock.
pub struct TestSuite {
    pub paths: ProjectPaths,
    pub command: Vec<String>,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
    pub skip: bool,
    pub now: DateTime<Utc>,
}

impl Finalizer for TestSuite {
    fn name(&self) -> &'static str {
        "test-suite"
    }

    fn run(&self, ctx: &InvocationContext) -> Result<()> {
        let Some((program, args)) = self.command.split_first() else {
            return Ok(());
        };
        if self.skip {
            debug!("test suite skipped");
            return Ok(());
        }
        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(self.paths.root())
            .env(REENTRY, "1");
        let limits = RunLimits {
            timeout: self.timeout,
            output_limit_bytes: self.output_limit_bytes,
        };
        let run = run_bounded(cmd, limits).with_context(|| format!("run test command {program}"))?;

        let report_path = self.paths.test_results_dir().join(format!(
            "{}-{}.log",
            self.now.format("%Y%m%dT%H%M%SZ"),
            file_safe(&ctx.session_id)
        ));
        if let Some(parent) = report_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        fs::write(&report_path, run.report(&self.command.join(" ")))
            .with_context(|| format!("write {}", report_path.display()))?;

        if run.passed() {
            info!(report = %report_path.display(), "test suite passed");
        } else {
            warn!(
                exit_code = ?run.status.code(),
                timed_out = run.timed_out,
                report = %report_path.display(),
                "test suite did not pass"
            );
        }
        Ok(())
    }
}

fn file_safe(id: &str) -> String {
    let cleaned: String = id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "session".to_string()
    } else {
        cleaned
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub timestamp: DateTime<Utc>,
    pub command: String,
    pub checker: String,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecuritySummary {
    pub session_id: String,
    pub generated_at: DateTime<Utc>,
    pub commands_audited: usize,
    pub blocked: Vec<Finding>,
    pub warnings: Vec<Finding>,
}

/// Re-evaluate this session's audited commands and summarize what matched.
pub struct SecurityScan {
    pub paths: ProjectPaths,
    pub rules: Arc<RuleRegistry>,
    pub now: DateTime<Utc>,
}

impl Finalizer for SecurityScan {
    fn name(&self) -> &'static str {
        "security-scan"
    }

    fn run(&self, ctx: &InvocationContext) -> Result<()> {
        let records: Vec<_> = read_audit(&self.paths.security_audit_log())
            .into_iter()
            .filter(|record| record.session_id == ctx.session_id)
            .collect();
        if records.is_empty() {
            return Ok(());
        }

        let mut summary = SecuritySummary {
            session_id: ctx.session_id.clone(),
            generated_at: self.now,
            commands_audited: records.len(),
            blocked: Vec::new(),
            warnings: Vec::new(),
        };
        let scans: [(&str, fn(&str, &RuleRegistry) -> Verdict); 3] = [
            ("dangerous-command", check_dangerous),
            ("compound-command", check_compound),
            ("deployment-safety", check_deployment),
        ];
        for record in &records {
            for (checker, scan) in scans {
                let finding = |detail: String| Finding {
                    timestamp: record.timestamp,
                    command: record.command.clone(),
                    checker: checker.to_string(),
                    detail,
                };
                match scan(&record.command, &self.rules) {
                    Verdict::Deny { reason, rule } => {
                        let detail = rule.unwrap_or_else(|| first_line(&reason));
                        summary.blocked.push(finding(detail));
                        break;
                    }
                    Verdict::Advisory { message } => summary.warnings.push(finding(message)),
                    Verdict::Allow { .. } => {}
                }
            }
        }
        write_json(&self.paths.security_summary(), &summary)?;
        info!(
            audited = summary.commands_audited,
            blocked = summary.blocked.len(),
            warnings = summary.warnings.len(),
            "security summary written"
        );
        Ok(())
    }
}

fn first_line(text: &str) -> String {
    text.lines().next().unwrap_or_default().to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillStat {
    pub count: usize,
    pub last_used: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillUsageSummary {
    pub generated_at: DateTime<Utc>,
    pub total: usize,
    pub skills: BTreeMap<String, SkillStat>,
}

/// Aggregate the skill usage log into per-skill counts.
pub struct SkillAnalytics {
    pub paths: ProjectPaths,
    pub now: DateTime<Utc>,
}

impl Finalizer for SkillAnalytics {
    fn name(&self) -> &'static str {
        "skill-analytics"
    }

    fn run(&self, _ctx: &InvocationContext) -> Result<()> {
        let records = read_skill_usage(&self.paths.skill_usage_log());
        if records.is_empty() {
            return Ok(());
        }
        let mut skills: BTreeMap<String, SkillStat> = BTreeMap::new();
        for record in &records {
            skills
                .entry(record.skill.clone())
                .and_modify(|stat| {
                    stat.count += 1;
                    stat.last_used = stat.last_used.max(record.timestamp);
                })
                .or_insert(SkillStat {
                    count: 1,
                    last_used: record.timestamp,
                });
        }
        let summary = SkillUsageSummary {
            generated_at: self.now,
            total: records.len(),
            skills,
        };
        write_json(&self.paths.skill_usage_summary(), &summary)
    }
}

/// Release every coordination lock held by this instance.
pub struct LockRelease {
    pub store: LockStore,
    pub instance_id: String,
}

impl Finalizer for LockRelease {
    fn name(&self) -> &'static str {
        "lock-release"
    }

    fn run(&self, _ctx: &InvocationContext) -> Result<()> {
        let released = self.store.release_owned(&self.instance_id)?;
        if released > 0 {
            info!(released, instance = %self.instance_id, "locks released");
        }
        Ok(())
    }
}

//! Append-only audit and usage logs under `.claude/logs/`.

use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::io::queue_store::{append_line, read_queue};

/// One audited shell command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub agent_id: String,
    pub command: String,
}

/// One skill invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillUsageRecord {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub agent_id: String,
    pub skill: String,
}

pub fn append_audit(path: &Path, record: &AuditRecord) -> Result<()> {
    append_line(path, record)
}

pub fn append_skill_usage(path: &Path, record: &SkillUsageRecord) -> Result<()> {
    append_line(path, record)
}

pub fn read_audit(path: &Path) -> Vec<AuditRecord> {
    read_queue(path)
}

pub fn read_skill_usage(path: &Path) -> Vec<SkillUsageRecord> {
    read_queue(path)
}

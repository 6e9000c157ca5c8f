//! Session state document (`.claude/context/session/state.json`).

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use jsonschema::{Validator, validator_for};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::io::atomic::write_atomic;
use crate::io::queue_store::{ArchiveOutcome, archive};

pub const SESSION_SCHEMA_ID: &str = "hookgate/session-state/v1";

const SCHEMA_SOURCE: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/schemas/session_state.schema.json"
));

static SCHEMA: LazyLock<Result<Validator, String>> = LazyLock::new(|| {
    let value: Value = serde_json::from_str(SCHEMA_SOURCE).map_err(|err| err.to_string())?;
    validator_for(&value).map_err(|err| err.to_string())
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadPosition {
    Start,
    End,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMeta {
    /// Where the host should place the state in the loaded context.
    pub position: LoadPosition,
    pub token_budget: usize,
    pub auto_load: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    #[serde(rename = "$schema")]
    pub schema: String,
    #[serde(rename = "_meta")]
    pub meta: SessionMeta,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub current_task: Option<String>,
    #[serde(default)]
    pub next_steps: Vec<String>,
    #[serde(default)]
    pub blockers: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    /// Fields written by other tools are carried through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SessionState {
    /// Empty template for a new session.
    pub fn new(session_id: Option<&str>, now: DateTime<Utc>, token_budget: usize) -> Self {
        Self {
            schema: SESSION_SCHEMA_ID.to_string(),
            meta: SessionMeta {
                position: LoadPosition::Start,
                token_budget,
                auto_load: true,
            },
            session_id: session_id.map(str::to_string),
            current_task: None,
            next_steps: Vec::new(),
            blockers: Vec::new(),
            started_at: now,
            last_activity: now,
            extra: Map::new(),
        }
    }
}

fn validate_schema(instance: &Value) -> Result<()> {
    let validator = SCHEMA
        .as_ref()
        .map_err(|err| anyhow!("invalid embedded session schema: {err}"))?;
    let messages: Vec<String> = validator
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        return Err(anyhow!(
            "session state schema validation failed: {}",
            messages.join("; ")
        ));
    }
    Ok(())
}

/// Load and validate the session state; `None` when absent.
pub fn load_session_state(path: &Path) -> Result<Option<SessionState>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("read session state {}", path.display()))?;
    let value: Value = serde_json::from_str(&contents)
        .with_context(|| format!("parse session state {}", path.display()))?;
    validate_schema(&value).with_context(|| format!("validate {}", path.display()))?;
    let state = serde_json::from_value(value)
        .with_context(|| format!("deserialize session state {}", path.display()))?;
    Ok(Some(state))
}

/// Atomically write session state (temp file + rename).
pub fn write_session_state(path: &Path, state: &SessionState) -> Result<()> {
    let value = serde_json::to_value(state).context("serialize session state")?;
    validate_schema(&value)?;
    let mut buf = serde_json::to_string_pretty(&value).context("serialize session state")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

/// Create the state, or merge into the existing one and refresh `last_activity`.
///
/// A state that fails to parse or validate is archived and replaced so a
/// corrupt file never blocks teardown.
pub fn touch_session_state(
    path: &Path,
    archive_dir: &Path,
    session_id: &str,
    now: DateTime<Utc>,
    token_budget: usize,
) -> Result<SessionState> {
    let session_id = Some(session_id).filter(|id| !id.is_empty());
    let state = match load_session_state(path) {
        Ok(Some(mut state)) => {
            if session_id.is_some() {
                state.session_id = session_id.map(str::to_string);
            }
            state.meta.token_budget = token_budget;
            state.last_activity = now;
            state
        }
        Ok(None) => {
            debug!(path = %path.display(), "creating session state");
            SessionState::new(session_id, now, token_budget)
        }
        Err(err) => {
            warn!(path = %path.display(), err = %format!("{err:#}"), "replacing invalid session state");
            archive(path, archive_dir, now)?;
            SessionState::new(session_id, now, token_budget)
        }
    };
    write_session_state(path, &state)?;
    Ok(state)
}

/// Archive the current state and write an empty template in its place.
pub fn archive_and_reset(
    path: &Path,
    archive_dir: &Path,
    now: DateTime<Utc>,
    token_budget: usize,
) -> Result<Option<PathBuf>> {
    let session_id = load_session_state(path)
        .ok()
        .flatten()
        .and_then(|state| state.session_id);
    let archived = match archive(path, archive_dir, now)? {
        ArchiveOutcome::Archived(target) => Some(target),
        ArchiveOutcome::Deleted | ArchiveOutcome::Absent => None,
    };
    write_session_state(
        path,
        &SessionState::new(session_id.as_deref(), now, token_budget),
    )?;
    info!(path = %path.display(), archived = ?archived, "session state reset");
    Ok(archived)
}

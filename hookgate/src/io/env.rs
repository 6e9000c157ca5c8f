//! Host environment, resolved once at process start.

use std::path::PathBuf;

pub const HOME: &str = "HOME";
pub const USERPROFILE: &str = "USERPROFILE";
pub const AGENT_ID: &str = "CLAUDE_AGENT_ID";
pub const INSTANCE_ID: &str = "CLAUDE_INSTANCE_ID";
pub const PROJECT_DIR: &str = "CLAUDE_PROJECT_DIR";
pub const MAX_CONTEXT_TOKENS: &str = "HOOKGATE_MAX_CONTEXT_TOKENS";
pub const SKIP_SYNC: &str = "HOOKGATE_SKIP_SYNC";
pub const REENTRY: &str = "HOOKGATE_REENTRY";

const FALLBACK_HOME: &str = "/tmp";
const UNKNOWN_AGENT: &str = "unknown";
const DEFAULT_INSTANCE: &str = "default";

/// Everything the gate reads from the process environment.
///
/// Components receive this struct instead of calling `std::env` themselves,
/// which keeps them deterministic under test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEnv {
    /// Home directory for global, cross-project stores.
    pub home_dir: PathBuf,
    /// Agent identity written into audit lines.
    pub agent_id: String,
    /// Identity used as the owner of coordination locks.
    pub instance_id: String,
    /// Project root supplied by the host, if any.
    pub project_dir: Option<PathBuf>,
    pub max_context_tokens: Option<usize>,
    pub skip_sync: bool,
    pub reentry: bool,
}

impl HostEnv {
    pub fn from_process() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let home_dir = non_empty(HOME)
            .or_else(|| non_empty(USERPROFILE))
            .map_or_else(|| PathBuf::from(FALLBACK_HOME), PathBuf::from);
        let agent_id = non_empty(AGENT_ID).unwrap_or_else(|| UNKNOWN_AGENT.to_string());
        let instance_id = non_empty(INSTANCE_ID)
            .or_else(|| non_empty(AGENT_ID))
            .unwrap_or_else(|| DEFAULT_INSTANCE.to_string());

        Self {
            home_dir,
            agent_id,
            instance_id,
            project_dir: non_empty(PROJECT_DIR).map(PathBuf::from),
            max_context_tokens: non_empty(MAX_CONTEXT_TOKENS)
                .and_then(|value| value.trim().parse().ok())
                .filter(|tokens| *tokens > 0),
            skip_sync: non_empty(SKIP_SYNC).is_some_and(|value| is_truthy(&value)),
            reentry: non_empty(REENTRY).is_some_and(|value| is_truthy(&value)),
        }
    }

    /// Project root: the host-supplied value, then the environment, then `cwd`.
    pub fn resolve_project_dir(&self, from_host: Option<&str>) -> PathBuf {
        from_host
            .filter(|dir| !dir.trim().is_empty())
            .map(PathBuf::from)
            .or_else(|| self.project_dir.clone())
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

fn is_truthy(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "" | "0" | "false" | "no" | "off"
    )
}

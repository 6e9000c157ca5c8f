//! Persisted state layout under `<project>/.claude/`.

use std::path::{Path, PathBuf};

pub const CLAUDE_DIR: &str = ".claude";
pub const CONFIG_FILE: &str = "hookgate.toml";
pub const ARCHIVE_DIR: &str = "archive";

/// Resolved locations of every file the gate reads or writes in a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectPaths {
    root: PathBuf,
}

impl ProjectPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn claude_dir(&self) -> PathBuf {
        self.root.join(CLAUDE_DIR)
    }

    pub fn config(&self) -> PathBuf {
        self.claude_dir().join(CONFIG_FILE)
    }

    pub fn coordination_dir(&self) -> PathBuf {
        self.claude_dir().join("coordination")
    }

    pub fn locks(&self) -> PathBuf {
        self.coordination_dir().join("locks.json")
    }

    pub fn memory_dir(&self) -> PathBuf {
        self.claude_dir().join("memory")
    }

    pub fn graph_queue(&self) -> PathBuf {
        self.memory_dir().join("graph-queue.jsonl")
    }

    pub fn memory_queue(&self) -> PathBuf {
        self.memory_dir().join("mem0-queue.jsonl")
    }

    pub fn decisions(&self) -> PathBuf {
        self.memory_dir().join("decisions.jsonl")
    }

    pub fn graph_pending(&self) -> PathBuf {
        self.memory_dir().join("graph-sync-pending.json")
    }

    pub fn memory_pending(&self) -> PathBuf {
        self.memory_dir().join("mem0-sync-pending.json")
    }

    pub fn memory_archive_dir(&self) -> PathBuf {
        self.memory_dir().join(ARCHIVE_DIR)
    }

    pub fn session_dir(&self) -> PathBuf {
        self.claude_dir().join("context").join("session")
    }

    pub fn session_state(&self) -> PathBuf {
        self.session_dir().join("state.json")
    }

    pub fn session_archive_dir(&self) -> PathBuf {
        self.session_dir().join(ARCHIVE_DIR)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.claude_dir().join("logs")
    }

    pub fn security_audit_log(&self) -> PathBuf {
        self.logs_dir().join("security-audit.log")
    }

    pub fn skill_usage_log(&self) -> PathBuf {
        self.logs_dir().join("skill-usage.log")
    }

    pub fn security_summary(&self) -> PathBuf {
        self.logs_dir().join("security-summary.json")
    }

    pub fn skill_usage_summary(&self) -> PathBuf {
        self.logs_dir().join("skill-usage-summary.json")
    }

    pub fn test_results_dir(&self) -> PathBuf {
        self.logs_dir().join("test-results")
    }

    pub fn logs_archive_dir(&self) -> PathBuf {
        self.logs_dir().join(ARCHIVE_DIR)
    }

    /// Files whose size counts against the context budget.
    pub fn context_files(&self) -> Vec<PathBuf> {
        vec![
            self.session_state(),
            self.decisions(),
            self.graph_queue(),
            self.memory_queue(),
        ]
    }
}

/// Global, cross-project config location under the home directory.
pub fn global_config(home_dir: &Path) -> PathBuf {
    home_dir.join(CLAUDE_DIR).join(CONFIG_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_matches_documented_paths() {
        let paths = ProjectPaths::new("/p");
        assert_eq!(paths.locks(), PathBuf::from("/p/.claude/coordination/locks.json"));
        assert_eq!(
            paths.graph_queue(),
            PathBuf::from("/p/.claude/memory/graph-queue.jsonl")
        );
        assert_eq!(
            paths.memory_queue(),
            PathBuf::from("/p/.claude/memory/mem0-queue.jsonl")
        );
        assert_eq!(
            paths.session_state(),
            PathBuf::from("/p/.claude/context/session/state.json")
        );
        assert_eq!(
            paths.security_audit_log(),
            PathBuf::from("/p/.claude/logs/security-audit.log")
        );
        assert_eq!(
            global_config(Path::new("/home/a")),
            PathBuf::from("/home/a/.claude/hookgate.toml")
        );
    }
}

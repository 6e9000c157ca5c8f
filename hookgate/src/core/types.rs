//! Shared deterministic types for the invocation/verdict protocol.
//!
//! These types define the contract between the host boundary, the checkers and
//! the dispatcher. They hold no handles to the filesystem and are cheap to
//! construct in tests.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

/// Parameter map supplied by the host for a single tool call.
pub type ToolInput = Map<String, Value>;

/// Tool kinds the gate reasons about.
///
/// Unknown tool names are carried as [`ToolKind::Other`] so that every checker
/// can match exhaustively and simply allow what it does not own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolKind {
    Bash,
    Write,
    Edit,
    MultiEdit,
    Read,
    Skill,
    BrowserNavigate,
    Other(String),
}

impl ToolKind {
    /// Map a host `tool_name` onto a tool kind.
    pub fn from_name(name: &str) -> Self {
        match name {
            "Bash" => Self::Bash,
            "Write" => Self::Write,
            "Edit" => Self::Edit,
            "MultiEdit" => Self::MultiEdit,
            "Read" => Self::Read,
            "Skill" => Self::Skill,
            "WebFetch" => Self::BrowserNavigate,
            other if other.ends_with("browser_navigate") => Self::BrowserNavigate,
            other => Self::Other(other.to_string()),
        }
    }

    /// Name used in logs and audit lines.
    pub fn name(&self) -> &str {
        match self {
            Self::Bash => "Bash",
            Self::Write => "Write",
            Self::Edit => "Edit",
            Self::MultiEdit => "MultiEdit",
            Self::Read => "Read",
            Self::Skill => "Skill",
            Self::BrowserNavigate => "BrowserNavigate",
            Self::Other(name) => name,
        }
    }

    /// True for tools that write file contents (`Write`, `Edit`, `MultiEdit`).
    pub fn is_file_mutation(&self) -> bool {
        matches!(self, Self::Write | Self::Edit | Self::MultiEdit)
    }
}

/// One tool call as seen by the gate. Read-only once constructed.
#[derive(Debug, Clone)]
pub struct InvocationContext {
    pub tool: ToolKind,
    pub tool_input: ToolInput,
    pub session_id: String,
    pub project_dir: PathBuf,
    /// Set when a finalizer's own side effects re-enter the dispatcher.
    pub reentry: bool,
}

impl InvocationContext {
    pub fn new(
        tool: ToolKind,
        tool_input: ToolInput,
        session_id: impl Into<String>,
        project_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            tool,
            tool_input,
            session_id: session_id.into(),
            project_dir: project_dir.into(),
            reentry: false,
        }
    }

    pub fn with_reentry(mut self, reentry: bool) -> Self {
        self.reentry = reentry;
        self
    }

    /// String parameter from the tool input, if present.
    pub fn str_param(&self, key: &str) -> Option<&str> {
        self.tool_input.get(key).and_then(Value::as_str)
    }

    /// Shell command text for `Bash` invocations.
    pub fn command(&self) -> Option<&str> {
        self.str_param("command")
    }

    /// Target path for file mutations.
    pub fn file_path(&self) -> Option<&str> {
        self.str_param("file_path")
    }

    /// Navigation target for browser/fetch tools.
    pub fn url(&self) -> Option<&str> {
        self.str_param("url")
    }

    /// Render `path` relative to the project root when it lives inside it.
    ///
    /// Paths outside the project are returned unchanged; separators are
    /// normalized to `/` so lock keys are stable across platforms.
    pub fn project_relative(&self, path: &str) -> String {
        let candidate = Path::new(path);
        let relative = candidate
            .strip_prefix(&self.project_dir)
            .unwrap_or(candidate)
            .to_string_lossy()
            .replace('\\', "/");
        relative.trim_start_matches("./").to_string()
    }
}

/// Outcome of a single checker.
///
/// Verdicts are ordered `Deny > Advisory > Allow`; see [`Verdict::rank`].
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// Proceed, optionally with a rewritten parameter map.
    Allow { updated_input: Option<ToolInput> },
    /// Proceed, surfacing guidance to the operator.
    Advisory { message: String },
    /// Block the call. `rule` names the rule that matched, when one did.
    Deny {
        reason: String,
        rule: Option<String>,
    },
}

impl Verdict {
    pub fn allow() -> Self {
        Self::Allow {
            updated_input: None,
        }
    }

    pub fn rewrite(updated_input: ToolInput) -> Self {
        Self::Allow {
            updated_input: Some(updated_input),
        }
    }

    pub fn advisory(message: impl Into<String>) -> Self {
        Self::Advisory {
            message: message.into(),
        }
    }

    pub fn deny(reason: impl Into<String>, rule: Option<&str>) -> Self {
        Self::Deny {
            reason: reason.into(),
            rule: rule.map(str::to_string),
        }
    }

    pub fn rank(&self) -> u8 {
        match self {
            Self::Allow { .. } => 0,
            Self::Advisory { .. } => 1,
            Self::Deny { .. } => 2,
        }
    }

    pub fn is_deny(&self) -> bool {
        matches!(self, Self::Deny { .. })
    }

    pub fn is_allow(&self) -> bool {
        matches!(self, Self::Allow { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_names_map_to_kinds() {
        assert_eq!(ToolKind::from_name("Bash"), ToolKind::Bash);
        assert_eq!(ToolKind::from_name("MultiEdit"), ToolKind::MultiEdit);
        assert_eq!(ToolKind::from_name("WebFetch"), ToolKind::BrowserNavigate);
        assert_eq!(
            ToolKind::from_name("mcp__playwright__browser_navigate"),
            ToolKind::BrowserNavigate
        );
        assert_eq!(
            ToolKind::from_name("Glob"),
            ToolKind::Other("Glob".to_string())
        );
        assert!(ToolKind::Edit.is_file_mutation());
        assert!(!ToolKind::Read.is_file_mutation());
    }

    #[test]
    fn project_relative_strips_root() {
        let ctx = InvocationContext::new(ToolKind::Write, ToolInput::new(), "s", "/project");
        assert_eq!(ctx.project_relative("/project/src/app.ts"), "src/app.ts");
        assert_eq!(ctx.project_relative("./src/app.ts"), "src/app.ts");
        assert_eq!(ctx.project_relative("/elsewhere/x.ts"), "/elsewhere/x.ts");
    }

    #[test]
    fn verdict_ranks_are_ordered() {
        let allow = Verdict::allow();
        let advisory = Verdict::advisory("careful");
        let deny = Verdict::deny("no", Some("rule"));
        assert!(allow.rank() < advisory.rank());
        assert!(advisory.rank() < deny.rank());
        assert!(deny.is_deny());
        assert!(allow.is_allow());
    }
}

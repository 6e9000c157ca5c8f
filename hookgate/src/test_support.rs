//! Test-only helpers for building projects, settings and invocations.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tempfile::TempDir;

use crate::core::types::{InvocationContext, ToolInput, ToolKind};
use crate::io::config::GateConfig;
use crate::io::env::HostEnv;
use crate::io::paths::ProjectPaths;
use crate::settings::Settings;

pub const SESSION_ID: &str = "session-1";
pub const INSTANCE_ID: &str = "instance-a";
pub const AGENT_ID: &str = "agent-a";

/// Temporary project root with an isolated home directory.
pub struct TestProject {
    dir: TempDir,
}

impl TestProject {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join("project")).expect("create project dir");
        fs::create_dir_all(dir.path().join("home")).expect("create home dir");
        Self { dir }
    }

    pub fn root(&self) -> PathBuf {
        self.dir.path().join("project")
    }

    pub fn home(&self) -> PathBuf {
        self.dir.path().join("home")
    }

    pub fn paths(&self) -> ProjectPaths {
        ProjectPaths::new(self.root())
    }

    /// Host environment pointing at this project's isolated home.
    pub fn env(&self) -> HostEnv {
        self.env_with(&[])
    }

    /// Host environment with extra variables layered on the defaults.
    pub fn env_with(&self, extra: &[(&str, &str)]) -> HostEnv {
        let mut vars: Vec<(String, String)> = vec![
            (
                crate::io::env::HOME.to_string(),
                self.home().to_string_lossy().to_string(),
            ),
            (crate::io::env::AGENT_ID.to_string(), AGENT_ID.to_string()),
            (crate::io::env::INSTANCE_ID.to_string(), INSTANCE_ID.to_string()),
        ];
        vars.extend(extra.iter().map(|(k, v)| (k.to_string(), v.to_string())));
        HostEnv::from_lookup(move |key| {
            vars.iter()
                .rev()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
        })
    }

    pub fn settings(&self) -> Settings {
        self.settings_with(GateConfig::default())
    }

    pub fn settings_with(&self, config: GateConfig) -> Settings {
        Settings::from_config(self.env(), config).expect("settings")
    }

    /// Write `contents` to a project-relative path, creating parents.
    pub fn write(&self, relative: &str, contents: &str) -> PathBuf {
        let path = self.root().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(&path, contents).expect("write file");
        path
    }
}

impl Default for TestProject {
    fn default() -> Self {
        Self::new()
    }
}

/// Build an invocation for `tool` with a JSON object as its input.
pub fn ctx(tool: ToolKind, input: Value, project_dir: &Path) -> InvocationContext {
    let tool_input: ToolInput = input.as_object().cloned().unwrap_or_default();
    InvocationContext::new(tool, tool_input, SESSION_ID, project_dir)
}

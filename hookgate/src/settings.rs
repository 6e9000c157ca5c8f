//! Per-process configuration injected into every component.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::core::git_policy::GitPolicy;
use crate::core::rules::RuleRegistry;
use crate::io::config::{GateConfig, load_layered};
use crate::io::env::HostEnv;
use crate::io::paths::{ProjectPaths, global_config};

/// Environment, config and compiled policies, resolved once.
#[derive(Debug, Clone)]
pub struct Settings {
    pub env: HostEnv,
    pub config: GateConfig,
    pub rules: Arc<RuleRegistry>,
    pub git_policy: Arc<GitPolicy>,
}

impl Settings {
    pub fn from_config(env: HostEnv, config: GateConfig) -> Result<Self> {
        let rules = RuleRegistry::new(&config.rule_policy()).context("build rule registry")?;
        let git_policy = config.git_policy().context("build git policy")?;
        Ok(Self {
            env,
            config,
            rules: Arc::new(rules),
            git_policy: Arc::new(git_policy),
        })
    }

    /// Load the project config, falling back to the global one, then defaults.
    pub fn load(env: HostEnv, paths: &ProjectPaths) -> Result<Self> {
        let config = load_layered(&paths.config(), &global_config(&env.home_dir))?;
        Self::from_config(env, config)
    }
}

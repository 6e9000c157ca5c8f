//! Host boundary: one JSON document in, one JSON verdict out.
//!
//! Nothing here returns an error to the host. Malformed input and internal
//! faults degrade to a silent allow so the gate never wedges a session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::checks::pre_action_checkers;
use crate::core::types::{InvocationContext, ToolInput, ToolKind};
use crate::dispatch::{Decision, post_action, pre_action, session_end};
use crate::finalize::session_finalizers;
use crate::io::config::GateConfig;
use crate::io::env::HostEnv;
use crate::io::paths::ProjectPaths;
use crate::settings::Settings;

/// Which host event is being handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookEvent {
    PreToolUse,
    PostToolUse,
    SessionEnd,
}

/// Invocation document sent by the host.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HookInput {
    pub tool_name: String,
    pub session_id: String,
    pub project_dir: Option<String>,
    pub tool_input: ToolInput,
    pub stop_hook_active: bool,
    pub reentry: bool,
}

/// Verdict document returned to the host.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HookOutput {
    #[serde(rename = "continue")]
    pub proceed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suppress_output: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_input: Option<ToolInput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission_decision: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission_decision_reason: Option<String>,
}

impl HookOutput {
    pub fn silent_allow() -> Self {
        Self {
            proceed: true,
            suppress_output: Some(true),
            ..Self::default()
        }
    }

    pub fn from_decision(decision: Decision) -> Self {
        match decision {
            Decision::Deny { reason, .. } => Self {
                proceed: false,
                stop_reason: Some(reason.clone()),
                permission_decision: Some("deny".to_string()),
                permission_decision_reason: Some(reason),
                ..Self::default()
            },
            Decision::Allow {
                advisories,
                updated_input,
            } if advisories.is_empty() && updated_input.is_none() => Self::silent_allow(),
            Decision::Allow {
                advisories,
                updated_input,
            } => Self {
                proceed: true,
                additional_context: (!advisories.is_empty()).then(|| advisories.join("\n\n")),
                updated_input,
                ..Self::default()
            },
        }
    }
}

/// Handle one host event. Infallible by contract.
pub fn handle(event: HookEvent, raw: &str, env: &HostEnv, now: DateTime<Utc>) -> HookOutput {
    let input: HookInput = if raw.trim().is_empty() {
        HookInput::default()
    } else {
        match serde_json::from_str(raw) {
            Ok(input) => input,
            Err(err) => {
                warn!(event = ?event, err = %err, "malformed hook input, allowing");
                return HookOutput::silent_allow();
            }
        }
    };

    let project_dir = env.resolve_project_dir(input.project_dir.as_deref());
    let paths = ProjectPaths::new(&project_dir);
    let Some(settings) = load_settings(env, &paths) else {
        return HookOutput::silent_allow();
    };

    let reentry = input.stop_hook_active || input.reentry || env.reentry;
    let ctx = InvocationContext::new(
        ToolKind::from_name(&input.tool_name),
        input.tool_input,
        input.session_id,
        &project_dir,
    )
    .with_reentry(reentry);
    debug!(event = ?event, tool = ctx.tool.name(), reentry, "handling hook");

    match event {
        HookEvent::PreToolUse => {
            let checkers = pre_action_checkers(&settings, &paths, now);
            HookOutput::from_decision(pre_action(&checkers, &ctx))
        }
        HookEvent::PostToolUse => {
            post_action(&settings, &paths, &ctx, now);
            HookOutput::silent_allow()
        }
        HookEvent::SessionEnd => {
            let finalizers = session_finalizers(&settings, &paths, now);
            session_end(&finalizers, &ctx);
            HookOutput::silent_allow()
        }
    }
}

fn load_settings(env: &HostEnv, paths: &ProjectPaths) -> Option<Settings> {
    match Settings::load(env.clone(), paths) {
        Ok(settings) => Some(settings),
        Err(err) => {
            warn!(err = %format!("{err:#}"), "config unusable, using defaults");
            Settings::from_config(env.clone(), GateConfig::default())
                .inspect_err(|err| warn!(err = %format!("{err:#}"), "default settings failed"))
                .ok()
        }
    }
}

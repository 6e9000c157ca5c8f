//! Default timeout injection for shell invocations.

use serde_json::Value;

use crate::core::types::{ToolInput, Verdict};

pub const DEFAULT_TIMEOUT_MS: u64 = 120_000;

/// Rewrite `input` with a `timeout` when it has none.
///
/// Every other field is carried over unchanged. An explicit `timeout`,
/// including `null`, is left alone.
pub fn inject_default_timeout(input: &ToolInput, timeout_ms: u64) -> Verdict {
    if input.contains_key("timeout") {
        return Verdict::allow();
    }
    let mut updated = input.clone();
    updated.insert("timeout".to_string(), Value::from(timeout_ms));
    Verdict::rewrite(updated)
}

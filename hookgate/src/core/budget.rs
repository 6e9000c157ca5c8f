//! Token-budget arithmetic for persisted context artifacts.

use serde::Serialize;

pub const DEFAULT_MAX_CONTEXT_TOKENS: usize = 200_000;

/// Share of the configured maximum that is usable for context artifacts.
const EFFECTIVE_WINDOW_PERCENT: usize = 80;
/// Share of the effective window at which compression is triggered.
const COMPRESS_THRESHOLD_PERCENT: usize = 70;

/// Cheap length-based token estimate (~4 characters per token).
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextBudget {
    pub max_context_tokens: usize,
}

impl ContextBudget {
    pub fn new(max_context_tokens: usize) -> Self {
        Self { max_context_tokens }
    }

    pub fn effective_window(&self) -> usize {
        self.max_context_tokens * EFFECTIVE_WINDOW_PERCENT / 100
    }

    pub fn threshold(&self) -> usize {
        self.effective_window() * COMPRESS_THRESHOLD_PERCENT / 100
    }

    /// True once `used_tokens` is strictly above the threshold.
    pub fn should_compress(&self, used_tokens: usize) -> bool {
        used_tokens > self.threshold()
    }

    pub fn report(&self, used_tokens: usize) -> BudgetReport {
        let effective_window = self.effective_window();
        let usage_percent = if effective_window == 0 {
            0.0
        } else {
            used_tokens as f64 * 100.0 / effective_window as f64
        };
        BudgetReport {
            used_tokens,
            effective_window,
            threshold: self.threshold(),
            usage_percent,
            compress: self.should_compress(used_tokens),
        }
    }
}

impl Default for ContextBudget {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONTEXT_TOKENS)
    }
}

/// Snapshot of budget usage, printed by `hookgate context-budget`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetReport {
    pub used_tokens: usize,
    pub effective_window: usize,
    pub threshold: usize,
    pub usage_percent: f64,
    pub compress: bool,
}

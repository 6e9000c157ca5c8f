//! Context budget tracker over persisted context artifacts.

use std::fs;
use std::path::PathBuf;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::core::budget::{BudgetReport, ContextBudget, estimate_tokens};
use crate::io::paths::ProjectPaths;
use crate::io::session_state::archive_and_reset;

/// Estimated tokens across `files`. Unreadable or absent files count as zero.
pub fn estimate_usage(files: &[PathBuf]) -> usize {
    files
        .iter()
        .map(|path| match fs::read_to_string(path) {
            Ok(contents) => estimate_tokens(&contents),
            Err(err) => {
                if path.exists() {
                    warn!(path = %path.display(), err = %err, "context file unreadable");
                }
                0
            }
        })
        .sum()
}

/// Outcome of one tracker pass.
#[derive(Debug, Clone, PartialEq)]
pub struct BudgetCheck {
    pub report: BudgetReport,
    /// Archive written when compression fired.
    pub compressed: Option<PathBuf>,
}

/// Measure usage and compress the session state when over the threshold.
pub fn check_and_compress(
    paths: &ProjectPaths,
    budget: &ContextBudget,
    now: DateTime<Utc>,
) -> Result<BudgetCheck> {
    let used = estimate_usage(&paths.context_files());
    let report = budget.report(used);
    debug!(
        used_tokens = report.used_tokens,
        threshold = report.threshold,
        "context budget measured"
    );
    if !report.compress {
        return Ok(BudgetCheck {
            report,
            compressed: None,
        });
    }
    info!(
        used_tokens = report.used_tokens,
        threshold = report.threshold,
        "context budget exceeded, compressing session state"
    );
    let compressed = archive_and_reset(
        &paths.session_state(),
        &paths.session_archive_dir(),
        now,
        budget.max_context_tokens,
    )?;
    Ok(BudgetCheck { report, compressed })
}

//! Policy gate for an agent's tool calls.
//!
//! The host calls in before a tool runs, after it ran, and when the session
//! ends. The crate keeps a strict split:
//!
//! - **[`core`]**: Pure, deterministic logic (normalization, rule matching,
//!   verdicts, queue folding, budget arithmetic). No I/O.
//! - **[`io`]**: Side-effecting adapters (config, environment, lock store,
//!   queues, logs, session state, git, child processes).
//!
//! Orchestration modules ([`checks`], [`finalize`], [`dispatch`], [`hook`])
//! wire core logic to I/O for the CLI.

pub mod checks;
pub mod core;
pub mod dispatch;
pub mod finalize;
pub mod hook;
pub mod io;
pub mod logging;
pub mod settings;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

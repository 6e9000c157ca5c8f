//! Side-effecting adapters: configuration, environment, persisted stores.

pub mod atomic;
pub mod audit;
pub mod config;
pub mod context_budget;
pub mod env;
pub mod git;
pub mod locks;
pub mod paths;
pub mod process;
pub mod queue_store;
pub mod session_state;

//! Deterministic, pure logic shared by the gate.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod browser;
pub mod budget;
pub mod compound;
pub mod dangerous;
pub mod deploy;
pub mod file_guard;
pub mod git_policy;
pub mod normalize;
pub mod queue;
pub mod rules;
pub mod timeout;
pub mod types;

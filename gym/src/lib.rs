//! Agent-execution and expectation engine.
//!
//! The gym drives an external coding agent against a real project, captures
//! what it changed, and verifies the result against declarative checks.
//!
//! - **[`core`]**: Pure, deterministic logic (snapshots and diffs, the event
//!   protocol, expectation predicates). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (filesystem walks, agent and
//!   command subprocesses, git). Isolated behind traits to enable mocking.
//!
//! [`cycle`] composes both into one snapshot → run → diff → evaluate pass.

pub mod core;
pub mod cycle;
pub mod exit_codes;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod validate;

//! Side-effecting code: filesystem, subprocesses, git, rendering.

pub mod command;
pub mod config;
pub mod engine;
pub mod git;
pub mod process;
pub mod session;
pub mod snapshotter;
pub(crate) mod sys;
pub mod transcript;

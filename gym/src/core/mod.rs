//! Deterministic, pure logic shared by the gym.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod diff_check;
pub mod events;
pub mod expectation;
pub mod file_check;
pub mod path;
pub mod snapshot;
pub mod syntax;
pub mod types;

//! Stable exit codes for gym CLI commands.

/// Command succeeded; every check passed.
pub const OK: i32 = 0;
/// Invalid input (unreadable or malformed expectations, bad config) or other errors.
pub const INVALID: i32 = 1;
/// `gym check` ran, but at least one check failed.
pub const FAILED: i32 = 2;

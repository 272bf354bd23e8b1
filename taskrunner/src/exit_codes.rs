//! Stable exit codes for taskrunner CLI commands.

/// Command succeeded; for `run`/`exec`, every step completed.
pub const OK: i32 = 0;
/// Invalid input, config, or plan, or any other error.
pub const INVALID: i32 = 1;
/// Execution finished with `success: false`.
pub const FAILED: i32 = 2;

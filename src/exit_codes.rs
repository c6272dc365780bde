//! Stable exit codes for the nlsh CLI.

/// Session ended with a satisfied instruction.
pub const OK: i32 = 0;
/// Usage, configuration, or other runner error.
pub const INVALID: i32 = 1;
/// Every attempt failed and the attempt budget is spent.
pub const EXHAUSTED: i32 = 2;
/// Session aborted by a user interrupt.
pub const ABORTED: i32 = 3;
/// User declined to execute the generated artifact.
pub const REJECTED: i32 = 4;
/// The generation provider failed; the session cannot continue.
pub const GENERATION_FAILED: i32 = 5;

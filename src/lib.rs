//! Turn a natural-language instruction into a working shell command or
//! script by generating, executing, and judging candidates in a loop.
//!
//! The core entry point is [`session::run_session`], which drives a
//! [`generator::Generator`] and an [`executor::ArtifactExecutor`] until the
//! instruction is satisfied, the attempt budget runs out, or the user steps
//! in. Every failed attempt is fed back into the next generation prompt so
//! the model can correct itself.

pub mod cancel;
pub mod config;
pub mod confirm;
pub mod evaluate;
pub mod executor;
pub mod exit_codes;
pub mod generator;
pub mod logging;
pub mod process;
pub mod prompt;
pub mod session;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

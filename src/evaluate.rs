//! Outcome Evaluator: decides whether an execution outcome satisfies the
//! instruction.
//!
//! Execution failures short-circuit without a model call. When execution
//! succeeded and verification is enabled, a secondary generation call judges
//! the captured output against the instruction; a failed or unreadable
//! verification call fails open toward retry rather than silently approving
//! an unverified result.

use std::fmt;

use tracing::{debug, instrument, warn};

use crate::config::ArtifactKind;
use crate::executor::ExecutionOutcome;
use crate::generator::Generator;
use crate::prompt::build_verify_prompt;

/// Evaluation result for one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Satisfied,
    Unsatisfied(FailCause),
    /// Evaluation never ran (session interrupted during execution).
    Skipped,
}

/// Why an attempt did not satisfy the instruction. Feeds the corrective
/// framing of the next generation prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailCause {
    CommandFailed { exit_code: Option<i32> },
    TimedOut,
    /// The model judged the captured output insufficient.
    VerificationRejected(String),
    /// The verification call itself failed or returned no usable verdict.
    VerificationUnavailable(String),
}

impl fmt::Display for FailCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailCause::CommandFailed {
                exit_code: Some(code),
            } => write!(f, "command exited with status {code}"),
            FailCause::CommandFailed { exit_code: None } => {
                write!(f, "command was killed before exiting")
            }
            FailCause::TimedOut => write!(f, "execution exceeded the time limit and was killed"),
            FailCause::VerificationRejected(reason) => {
                write!(f, "output did not satisfy the instruction: {reason}")
            }
            FailCause::VerificationUnavailable(detail) => {
                write!(f, "verification call failed: {detail}")
            }
        }
    }
}

/// Evaluate one execution outcome.
///
/// Never returns an error: evaluation trouble becomes an `Unsatisfied`
/// verdict so the session can retry with that context.
#[instrument(skip_all, fields(verify = verify, exit_code = ?outcome.exit_code, timed_out = outcome.timed_out))]
pub fn evaluate<G: Generator>(
    generator: &G,
    instruction: &str,
    artifact: &str,
    kind: ArtifactKind,
    outcome: &ExecutionOutcome,
    verify: bool,
    prompt_output_limit: usize,
) -> Verdict {
    if outcome.timed_out {
        return Verdict::Unsatisfied(FailCause::TimedOut);
    }
    if !outcome.succeeded() {
        return Verdict::Unsatisfied(FailCause::CommandFailed {
            exit_code: outcome.exit_code,
        });
    }
    if !verify {
        debug!("verification disabled, exit status 0 is success");
        return Verdict::Satisfied;
    }

    let prompt = match build_verify_prompt(
        instruction,
        artifact,
        kind,
        &outcome.stdout,
        prompt_output_limit,
    ) {
        Ok(prompt) => prompt,
        Err(err) => {
            warn!(err = %err, "could not build verification prompt");
            return Verdict::Unsatisfied(FailCause::VerificationUnavailable(format!("{err:#}")));
        }
    };
    match generator.generate(&prompt.system, &prompt.user) {
        Ok(reply) => parse_verdict(&reply),
        Err(err) => {
            warn!(err = %err, "verification call failed, treating as unsatisfied");
            Verdict::Unsatisfied(FailCause::VerificationUnavailable(err.to_string()))
        }
    }
}

/// Parse a boolean-style verdict from the first line of a verification reply.
pub fn parse_verdict(reply: &str) -> Verdict {
    let first = reply.trim().lines().next().unwrap_or("").trim();
    let word = first
        .split(|c: char| !c.is_ascii_alphanumeric())
        .next()
        .unwrap_or("")
        .to_ascii_lowercase();
    match word.as_str() {
        "satisfied" | "yes" | "true" => Verdict::Satisfied,
        "unsatisfied" | "no" | "false" => {
            let reason = first
                .split_once(':')
                .map(|(_, rest)| rest.trim())
                .filter(|rest| !rest.is_empty())
                .unwrap_or("output judged insufficient")
                .to_string();
            Verdict::Unsatisfied(FailCause::VerificationRejected(reason))
        }
        _ => Verdict::Unsatisfied(FailCause::VerificationUnavailable(format!(
            "unrecognized verdict: {first}"
        ))),
    }
}

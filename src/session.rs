//! Attempt controller: the generate, confirm, execute, evaluate loop.
//!
//! One session serves one instruction. Attempts run strictly in sequence
//! and every completed attempt is appended to the history before the next
//! generation call, so each prompt sees all prior attempts in order.

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::cancel::CancelToken;
use crate::config::{ArtifactKind, SessionConfig};
use crate::confirm::{Confirmer, Decision};
use crate::evaluate::{Verdict, evaluate};
use crate::executor::{ArtifactExecutor, ExecRequest, ExecutionOutcome};
use crate::generator::Generator;
use crate::prompt::build_generate_prompt;

/// One completed generate-execute-evaluate cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    /// 1-based position within the session.
    pub index: u32,
    pub kind: ArtifactKind,
    pub artifact: String,
    pub outcome: ExecutionOutcome,
    pub verdict: Verdict,
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunResult {
    Succeeded,
    AttemptsExhausted,
    AbortedByUser,
    RejectedByUser,
    /// The generation provider failed; retrying with the same prompt would
    /// hit the same failure, so this ends the session.
    GenerationFailed(String),
}

/// Terminal state of a session: how it ended plus everything it tried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    pub result: RunResult,
    pub history: Vec<Attempt>,
}

/// Run one instruction to a terminal state.
///
/// `on_attempt` fires after each attempt is recorded, before the next
/// generation call, so a caller can report progress as it happens.
///
/// Returns `Err` only for faults outside the loop's own taxonomy, such as
/// an executor that cannot spawn the configured shell at all.
#[instrument(skip_all, fields(kind = %config.kind, max_attempts = config.max_attempts))]
pub fn run_session<G, E, C>(
    generator: &G,
    executor: &E,
    confirmer: &mut C,
    config: &SessionConfig,
    instruction: &str,
    cancel: &CancelToken,
    mut on_attempt: impl FnMut(&Attempt),
) -> Result<SessionOutcome>
where
    G: Generator,
    E: ArtifactExecutor,
    C: Confirmer,
{
    let mut history: Vec<Attempt> = Vec::new();

    for index in 1..=config.max_attempts {
        if cancel.is_cancelled() {
            info!(attempt = index, "session cancelled before generation");
            return Ok(SessionOutcome {
                result: RunResult::AbortedByUser,
                history,
            });
        }

        debug!(attempt = index, "generating artifact");
        let prompt = build_generate_prompt(
            instruction,
            config.kind,
            &history,
            config.prompt_output_limit_bytes,
            &config.workdir,
        )
        .context("build generation prompt")?;
        let artifact = match generator.generate(&prompt.system, &prompt.user) {
            Ok(artifact) => artifact,
            Err(err) => {
                warn!(attempt = index, err = %err, "generation failed");
                return Ok(SessionOutcome {
                    result: RunResult::GenerationFailed(err.to_string()),
                    history,
                });
            }
        };

        if cancel.is_cancelled() {
            info!(attempt = index, "session cancelled before execution");
            return Ok(SessionOutcome {
                result: RunResult::AbortedByUser,
                history,
            });
        }

        if config.confirm {
            match confirmer
                .confirm(&artifact, config.kind)
                .context("confirm artifact")?
            {
                Decision::Approved => {}
                Decision::Rejected => {
                    // Nothing executed, nothing to learn from: no attempt
                    // is recorded.
                    info!(attempt = index, "artifact rejected");
                    return Ok(SessionOutcome {
                        result: RunResult::RejectedByUser,
                        history,
                    });
                }
            }
        }

        let request = ExecRequest {
            artifact: artifact.clone(),
            kind: config.kind,
            workdir: config.workdir.clone(),
            timeout: Duration::from_secs(config.exec_timeout_secs),
            output_limit_bytes: config.output_limit_bytes,
            cleanup_script: config.cleanup_script,
            synchronous: config.synchronous,
        };
        let outcome = executor
            .execute(&request, cancel)
            .with_context(|| format!("execute attempt {index}"))?;

        if outcome.interrupted {
            info!(attempt = index, "execution interrupted");
            let attempt = Attempt {
                index,
                kind: config.kind,
                artifact,
                outcome,
                verdict: Verdict::Skipped,
            };
            on_attempt(&attempt);
            history.push(attempt);
            return Ok(SessionOutcome {
                result: RunResult::AbortedByUser,
                history,
            });
        }

        let verdict = evaluate(
            generator,
            instruction,
            &artifact,
            config.kind,
            &outcome,
            config.verify,
            config.prompt_output_limit_bytes,
        );
        let satisfied = verdict == Verdict::Satisfied;
        let attempt = Attempt {
            index,
            kind: config.kind,
            artifact,
            outcome,
            verdict,
        };
        on_attempt(&attempt);
        history.push(attempt);

        if satisfied {
            info!(attempt = index, "instruction satisfied");
            return Ok(SessionOutcome {
                result: RunResult::Succeeded,
                history,
            });
        }
        debug!(attempt = index, "attempt unsatisfied, retrying");
    }

    info!(max_attempts = config.max_attempts, "attempt budget exhausted");
    Ok(SessionOutcome {
        result: RunResult::AttemptsExhausted,
        history,
    })
}

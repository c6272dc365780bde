//! Prompt construction for generation and verification calls.
//!
//! Templates are rendered with minijinja. The first generation prompt holds
//! only the instruction and the artifact-kind directive; retry prompts
//! additionally quote every prior attempt in order, with captured output
//! truncated to a bounded size to control cost.

use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;

use crate::config::ArtifactKind;
use crate::evaluate::Verdict;
use crate::session::Attempt;

const SHELL_SYSTEM_TEMPLATE: &str = include_str!("prompts/shell_system.md");
const SCRIPT_SYSTEM_TEMPLATE: &str = include_str!("prompts/script_system.md");
const GENERATE_USER_TEMPLATE: &str = include_str!("prompts/generate_user.md");
const VERIFY_USER_TEMPLATE: &str = include_str!("prompts/verify_user.md");

const VERIFY_SYSTEM: &str = "You judge whether the captured output of an executed command satisfies the user's original instruction.\n\nReply on the first line with exactly `SATISFIED` if the output accomplishes the instruction, or `UNSATISFIED: <short reason>` if it does not. Judge only what the output shows, not what the command promises.";

static ENGINE: LazyLock<Environment<'static>> = LazyLock::new(|| {
    let mut env = Environment::new();
    env.add_template("shell_system", SHELL_SYSTEM_TEMPLATE)
        .expect("shell system template should be valid");
    env.add_template("script_system", SCRIPT_SYSTEM_TEMPLATE)
        .expect("script system template should be valid");
    env.add_template("generate_user", GENERATE_USER_TEMPLATE)
        .expect("generate user template should be valid");
    env.add_template("verify_user", VERIFY_USER_TEMPLATE)
        .expect("verify user template should be valid");
    env
});

/// A rendered system/user prompt pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// Prior-attempt context for template rendering.
#[derive(Debug, Clone, Serialize)]
struct AttemptContext {
    index: u32,
    artifact: String,
    reason: String,
    exit_code: Option<i32>,
    timed_out: bool,
    stdout: String,
    stderr: String,
}

impl AttemptContext {
    fn from_attempt(attempt: &Attempt, limit: usize) -> Self {
        Self {
            index: attempt.index,
            artifact: attempt.artifact.clone(),
            reason: describe_verdict(&attempt.verdict),
            exit_code: attempt.outcome.exit_code,
            timed_out: attempt.outcome.timed_out,
            stdout: truncate_for_prompt(&attempt.outcome.stdout, limit),
            stderr: truncate_for_prompt(&attempt.outcome.stderr, limit),
        }
    }
}

/// Build the generation prompt for the next attempt.
///
/// `history` must hold every completed prior attempt in order; each one is
/// quoted so the model can correct its own failure instead of guessing.
pub fn build_generate_prompt(
    instruction: &str,
    kind: ArtifactKind,
    history: &[Attempt],
    limit: usize,
    workdir: &Path,
) -> Result<Prompt> {
    let attempts: Vec<AttemptContext> = history
        .iter()
        .map(|attempt| AttemptContext::from_attempt(attempt, limit))
        .collect();

    let system_template = match kind {
        ArtifactKind::Shell => "shell_system",
        ArtifactKind::Script => "script_system",
    };
    let system = ENGINE
        .get_template(system_template)
        .and_then(|template| {
            template.render(context! { workdir => workdir.display().to_string() })
        })
        .context("render system prompt")?;
    let user = ENGINE
        .get_template("generate_user")
        .and_then(|template| {
            template.render(context! {
                instruction => instruction,
                kind => kind.to_string(),
                attempts => attempts,
            })
        })
        .context("render generation prompt")?;

    Ok(Prompt { system, user })
}

/// Build the secondary verification prompt judging captured output against
/// the original instruction.
pub fn build_verify_prompt(
    instruction: &str,
    artifact: &str,
    kind: ArtifactKind,
    stdout: &str,
    limit: usize,
) -> Result<Prompt> {
    let user = ENGINE
        .get_template("verify_user")
        .and_then(|template| {
            template.render(context! {
                instruction => instruction,
                artifact => artifact,
                kind => kind.to_string(),
                stdout => truncate_for_prompt(stdout, limit),
            })
        })
        .context("render verification prompt")?;

    Ok(Prompt {
        system: VERIFY_SYSTEM.to_string(),
        user,
    })
}

fn describe_verdict(verdict: &Verdict) -> String {
    match verdict {
        Verdict::Satisfied => "satisfied".to_string(),
        Verdict::Skipped => "not evaluated".to_string(),
        Verdict::Unsatisfied(cause) => cause.to_string(),
    }
}

/// Truncate text for inclusion in a prompt, keeping the head and noting how
/// many bytes were dropped. Cuts at a char boundary.
pub(crate) fn truncate_for_prompt(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut cut = limit;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}\n[truncated {} bytes]", &text[..cut], text.len() - cut)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluate::FailCause;
    use crate::test_support::{exec_failure, exec_timeout};

    fn failed_attempt(index: u32, artifact: &str, exit_code: i32, stderr: &str) -> Attempt {
        Attempt {
            index,
            kind: ArtifactKind::Shell,
            artifact: artifact.to_string(),
            outcome: exec_failure(exit_code, stderr),
            verdict: Verdict::Unsatisfied(FailCause::CommandFailed {
                exit_code: Some(exit_code),
            }),
        }
    }

    #[test]
    fn first_prompt_has_no_attempt_sections() {
        let prompt =
            build_generate_prompt("list files", ArtifactKind::Shell, &[], 4_000, Path::new("/tmp"))
                .expect("prompt");

        assert!(prompt.user.contains("list files"));
        assert!(!prompt.user.contains("Previous attempts"));
        assert!(prompt.system.contains("/tmp"));
        assert!(prompt.system.contains("shell command"));
    }

    #[test]
    fn script_system_prompt_carries_uv_metadata_directive() {
        let prompt =
            build_generate_prompt("count words", ArtifactKind::Script, &[], 4_000, Path::new("."))
                .expect("prompt");

        assert!(prompt.system.contains("# /// script"));
        assert!(prompt.system.contains("uv run"));
    }

    #[test]
    fn retry_prompt_quotes_all_prior_attempts_in_order() {
        let history = vec![
            failed_attempt(1, "ls /nope", 2, "no such file"),
            failed_attempt(2, "ls /also-nope", 2, "still missing"),
        ];
        let prompt = build_generate_prompt(
            "list files",
            ArtifactKind::Shell,
            &history,
            4_000,
            Path::new("."),
        )
        .expect("prompt");

        let first = prompt.user.find("ls /nope").expect("first artifact");
        let second = prompt.user.find("ls /also-nope").expect("second artifact");
        assert!(first < second);
        assert!(prompt.user.contains("exited with status 2"));
        assert!(prompt.user.contains("no such file"));
        assert!(prompt.user.contains("still missing"));
    }

    #[test]
    fn retry_prompt_frames_timeouts_distinctly() {
        let history = vec![Attempt {
            index: 1,
            kind: ArtifactKind::Shell,
            artifact: "sleep 999".to_string(),
            outcome: exec_timeout(),
            verdict: Verdict::Unsatisfied(FailCause::TimedOut),
        }];
        let prompt = build_generate_prompt(
            "wait a bit",
            ArtifactKind::Shell,
            &history,
            4_000,
            Path::new("."),
        )
        .expect("prompt");

        assert!(prompt.user.contains("exceeded the time limit"));
        // Timeouts carry no exit status line.
        assert!(!prompt.user.contains("Exit status:"));
    }

    #[test]
    fn attempt_output_is_truncated_with_notice() {
        let mut outcome = exec_failure(1, "");
        outcome.stdout = "x".repeat(100);
        let history = vec![Attempt {
            index: 1,
            kind: ArtifactKind::Shell,
            artifact: "yes | head -c 100".to_string(),
            outcome,
            verdict: Verdict::Unsatisfied(FailCause::CommandFailed { exit_code: Some(1) }),
        }];
        let prompt =
            build_generate_prompt("noise", ArtifactKind::Shell, &history, 10, Path::new("."))
                .expect("prompt");

        assert!(prompt.user.contains("[truncated 90 bytes]"));
        assert!(!prompt.user.contains(&"x".repeat(11)));
    }

    #[test]
    fn verify_prompt_contains_instruction_artifact_and_stdout() {
        let prompt = build_verify_prompt(
            "count files",
            "ls | wc -l",
            ArtifactKind::Shell,
            "42\n",
            4_000,
        )
        .expect("prompt");

        assert!(prompt.system.contains("SATISFIED"));
        assert!(prompt.user.contains("count files"));
        assert!(prompt.user.contains("ls | wc -l"));
        assert!(prompt.user.contains("42"));
    }

    #[test]
    fn truncate_for_prompt_cuts_at_char_boundary() {
        let text = "héllo wörld";
        let truncated = truncate_for_prompt(text, 2);
        assert!(truncated.starts_with('h'));
        assert!(truncated.contains("[truncated"));
        assert_eq!(truncate_for_prompt("short", 100), "short");
    }
}

//! Interaction gate: human approval before executing a generated artifact.

use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};

use crate::config::ArtifactKind;

/// Outcome of presenting an artifact for approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approved,
    Rejected,
}

/// Seam between the session loop and whatever approves execution.
pub trait Confirmer {
    fn confirm(&mut self, artifact: &str, kind: ArtifactKind) -> Result<Decision>;
}

/// Prompts on stderr and reads a y/N answer from stdin. Anything other
/// than an explicit yes rejects, so an accidental Enter is safe.
#[derive(Debug, Default)]
pub struct StdinConfirmer;

impl Confirmer for StdinConfirmer {
    fn confirm(&mut self, artifact: &str, kind: ArtifactKind) -> Result<Decision> {
        let mut stderr = io::stderr().lock();
        writeln!(stderr, "\nProposed {kind}:\n").context("write confirmation prompt")?;
        for line in artifact.lines() {
            writeln!(stderr, "    {line}").context("write confirmation prompt")?;
        }
        write!(stderr, "\nExecute? [y/N] ").context("write confirmation prompt")?;
        stderr.flush().context("flush confirmation prompt")?;

        let mut answer = String::new();
        io::stdin()
            .lock()
            .read_line(&mut answer)
            .context("read confirmation answer")?;
        Ok(parse_answer(&answer))
    }
}

fn parse_answer(answer: &str) -> Decision {
    match answer.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Decision::Approved,
        _ => Decision::Rejected,
    }
}

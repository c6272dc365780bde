//! Scripted doubles for exercising the session loop without a network,
//! a subprocess, or a terminal.
//!
//! Available to integration tests through the `test-support` feature.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::time::Duration;

use anyhow::Result;

use crate::config::ArtifactKind;
use crate::confirm::{Confirmer, Decision};
use crate::executor::{ArtifactExecutor, ExecRequest, ExecutionOutcome};
use crate::generator::{GenerationError, Generator};

/// Generator that replays a fixed sequence of outcomes and records every
/// prompt it was handed.
#[derive(Debug)]
pub struct ScriptedGenerator {
    replies: RefCell<VecDeque<Result<String, GenerationError>>>,
    prompts: RefCell<Vec<(String, String)>>,
}

impl ScriptedGenerator {
    pub fn new(replies: Vec<Result<String, GenerationError>>) -> Self {
        Self {
            replies: RefCell::new(replies.into()),
            prompts: RefCell::new(Vec::new()),
        }
    }

    pub fn with_replies<S: Into<String>>(replies: Vec<S>) -> Self {
        Self::new(replies.into_iter().map(|reply| Ok(reply.into())).collect())
    }

    /// Number of generation calls made so far.
    pub fn calls(&self) -> usize {
        self.prompts.borrow().len()
    }

    /// Every (system, user) prompt pair seen, in call order.
    pub fn prompts(&self) -> Vec<(String, String)> {
        self.prompts.borrow().clone()
    }
}

impl Generator for ScriptedGenerator {
    fn generate(&self, system: &str, user: &str) -> Result<String, GenerationError> {
        self.prompts
            .borrow_mut()
            .push((system.to_string(), user.to_string()));
        self.replies
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| panic!("unexpected generation call for user prompt: {user}"))
    }
}

/// Executor that replays fixed outcomes and records every request.
#[derive(Debug)]
pub struct ScriptedExecutor {
    outcomes: RefCell<VecDeque<ExecutionOutcome>>,
    requests: RefCell<Vec<ExecRequest>>,
}

impl ScriptedExecutor {
    pub fn new(outcomes: Vec<ExecutionOutcome>) -> Self {
        Self {
            outcomes: RefCell::new(outcomes.into()),
            requests: RefCell::new(Vec::new()),
        }
    }

    /// Number of execution calls made so far.
    pub fn executions(&self) -> usize {
        self.requests.borrow().len()
    }

    /// Every request seen, in call order.
    pub fn requests(&self) -> Vec<ExecRequest> {
        self.requests.borrow().clone()
    }
}

impl ArtifactExecutor for ScriptedExecutor {
    fn execute(
        &self,
        request: &ExecRequest,
        _cancel: &crate::cancel::CancelToken,
    ) -> Result<ExecutionOutcome> {
        self.requests.borrow_mut().push(request.clone());
        Ok(self
            .outcomes
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| panic!("unexpected execution of artifact: {}", request.artifact)))
    }
}

/// Confirmer that approves everything.
#[derive(Debug, Default)]
pub struct AutoConfirmer;

impl Confirmer for AutoConfirmer {
    fn confirm(&mut self, _artifact: &str, _kind: ArtifactKind) -> Result<Decision> {
        Ok(Decision::Approved)
    }
}

/// Confirmer that replays fixed decisions and records every artifact it
/// was shown.
#[derive(Debug)]
pub struct ScriptedConfirmer {
    decisions: VecDeque<Decision>,
    asked: Vec<String>,
}

impl ScriptedConfirmer {
    pub fn new(decisions: Vec<Decision>) -> Self {
        Self {
            decisions: decisions.into(),
            asked: Vec::new(),
        }
    }

    /// Every artifact presented for approval, in call order.
    pub fn asked(&self) -> Vec<String> {
        self.asked.clone()
    }
}

impl Confirmer for ScriptedConfirmer {
    fn confirm(&mut self, artifact: &str, _kind: ArtifactKind) -> Result<Decision> {
        self.asked.push(artifact.to_string());
        Ok(self
            .decisions
            .pop_front()
            .unwrap_or_else(|| panic!("unexpected confirmation for artifact: {artifact}")))
    }
}

/// Outcome of an execution that exited 0 with the given stdout.
pub fn exec_success(stdout: &str) -> ExecutionOutcome {
    ExecutionOutcome {
        exit_code: Some(0),
        stdout: stdout.to_string(),
        stderr: String::new(),
        stdout_truncated: 0,
        stderr_truncated: 0,
        duration: Duration::from_millis(5),
        timed_out: false,
        interrupted: false,
    }
}

/// Outcome of an execution that exited nonzero with the given stderr.
pub fn exec_failure(exit_code: i32, stderr: &str) -> ExecutionOutcome {
    ExecutionOutcome {
        exit_code: Some(exit_code),
        stdout: String::new(),
        stderr: stderr.to_string(),
        stdout_truncated: 0,
        stderr_truncated: 0,
        duration: Duration::from_millis(5),
        timed_out: false,
        interrupted: false,
    }
}

/// Outcome of an execution killed at its time limit.
pub fn exec_timeout() -> ExecutionOutcome {
    ExecutionOutcome {
        exit_code: None,
        stdout: String::new(),
        stderr: String::new(),
        stdout_truncated: 0,
        stderr_truncated: 0,
        duration: Duration::from_secs(300),
        timed_out: true,
        interrupted: false,
    }
}

/// Outcome of an execution cut short by cancellation.
pub fn exec_interrupted() -> ExecutionOutcome {
    ExecutionOutcome {
        exit_code: None,
        stdout: String::new(),
        stderr: String::new(),
        stdout_truncated: 0,
        stderr_truncated: 0,
        duration: Duration::from_millis(50),
        timed_out: false,
        interrupted: true,
    }
}

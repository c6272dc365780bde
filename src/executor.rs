//! Executor abstraction for generated artifacts.
//!
//! The [`ArtifactExecutor`] trait decouples the session loop from real
//! process spawning. Tests use scripted executors that return predetermined
//! outcomes without touching the host; [`ProcessExecutor`] runs artifacts
//! for real: shell commands through the system shell, scripts through an
//! isolated-dependency runner via a uniquely named temp file.

use std::io::Write;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::cancel::CancelToken;
use crate::config::{ArtifactKind, SessionConfig};
use crate::process::{CommandOutput, run_command_with_timeout};

/// Parameters for executing one artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    /// Generated artifact text: a command line or script source.
    pub artifact: String,
    pub kind: ArtifactKind,
    /// Working directory for the child process.
    pub workdir: PathBuf,
    /// Maximum time to wait before the child is killed.
    pub timeout: Duration,
    /// Truncate captured stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
    /// Delete the script temp file after execution.
    pub cleanup_script: bool,
    /// Block in a single wait instead of a cancellation-aware polling wait.
    pub synchronous: bool,
}

/// Outcome of executing one generated artifact.
///
/// `exit_code` is `None` when the child was killed before exiting on its
/// own (timeout or cancellation).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub duration: Duration,
    pub timed_out: bool,
    pub interrupted: bool,
}

impl ExecutionOutcome {
    /// Exit status 0 is necessary but not sufficient for a satisfied
    /// attempt; verification may still reject the output.
    pub fn succeeded(&self) -> bool {
        !self.timed_out && !self.interrupted && self.exit_code == Some(0)
    }
}

/// Abstraction over artifact execution backends.
pub trait ArtifactExecutor {
    fn execute(&self, request: &ExecRequest, cancel: &CancelToken) -> Result<ExecutionOutcome>;
}

/// Executor that runs artifacts as real host processes.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    shell: Vec<String>,
    script_runner: Vec<String>,
}

impl ProcessExecutor {
    pub fn new(shell: Vec<String>, script_runner: Vec<String>) -> Self {
        Self {
            shell,
            script_runner,
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.shell.clone(), config.script_runner.clone())
    }

    fn execute_shell(&self, request: &ExecRequest, cancel: &CancelToken) -> Result<ExecutionOutcome> {
        let mut cmd = command_from_argv(&self.shell, "shell")?;
        cmd.arg(&request.artifact).current_dir(&request.workdir);
        let output = run_command_with_timeout(
            cmd,
            request.timeout,
            request.output_limit_bytes,
            request.synchronous,
            cancel,
        )
        .context("run shell command")?;
        Ok(outcome_from(output))
    }

    fn execute_script(&self, request: &ExecRequest, cancel: &CancelToken) -> Result<ExecutionOutcome> {
        // Unique per session: concurrent invocations must never share a path.
        let mut file = tempfile::Builder::new()
            .prefix("nlsh-")
            .suffix(".py")
            .tempfile()
            .context("create script temp file")?;
        file.write_all(request.artifact.as_bytes())
            .context("write script temp file")?;
        file.as_file_mut().flush().context("flush script temp file")?;
        let script_path = file.into_temp_path();

        debug!(script = %script_path.display(), "running script artifact");
        let mut cmd = command_from_argv(&self.script_runner, "script_runner")?;
        cmd.arg(script_path.as_os_str())
            .current_dir(&request.workdir);
        let output = run_command_with_timeout(
            cmd,
            request.timeout,
            request.output_limit_bytes,
            request.synchronous,
            cancel,
        )
        .context("run script")?;

        if request.cleanup_script {
            script_path
                .close()
                .context("remove script temp file")?;
        } else {
            match script_path.keep() {
                Ok(path) => info!(script = %path.display(), "kept script artifact"),
                Err(err) => warn!(err = %err, "failed to keep script artifact"),
            }
        }
        Ok(outcome_from(output))
    }
}

impl ArtifactExecutor for ProcessExecutor {
    #[instrument(skip_all, fields(kind = %request.kind, timeout_secs = request.timeout.as_secs()))]
    fn execute(&self, request: &ExecRequest, cancel: &CancelToken) -> Result<ExecutionOutcome> {
        match request.kind {
            ArtifactKind::Shell => self.execute_shell(request, cancel),
            ArtifactKind::Script => self.execute_script(request, cancel),
        }
    }
}

fn command_from_argv(argv: &[String], label: &str) -> Result<Command> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| anyhow!("{label} command is empty"))?;
    let mut cmd = Command::new(program);
    cmd.args(args);
    Ok(cmd)
}

fn outcome_from(output: CommandOutput) -> ExecutionOutcome {
    ExecutionOutcome {
        exit_code: output.status.and_then(|status| status.code()),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        stdout_truncated: output.stdout_truncated,
        stderr_truncated: output.stderr_truncated,
        duration: output.duration,
        timed_out: output.timed_out,
        interrupted: output.interrupted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(artifact: &str, kind: ArtifactKind, workdir: PathBuf) -> ExecRequest {
        ExecRequest {
            artifact: artifact.to_string(),
            kind,
            workdir,
            timeout: Duration::from_secs(10),
            output_limit_bytes: 10_000,
            cleanup_script: true,
            synchronous: false,
        }
    }

    #[test]
    fn shell_artifact_runs_through_the_shell() {
        let temp = tempfile::tempdir().expect("tempdir");
        let executor = ProcessExecutor::new(
            vec!["sh".to_string(), "-c".to_string()],
            vec!["uv".to_string(), "run".to_string()],
        );

        let outcome = executor
            .execute(
                &request("echo hi && pwd", ArtifactKind::Shell, temp.path().to_path_buf()),
                &CancelToken::new(),
            )
            .expect("execute");

        assert!(outcome.succeeded());
        assert!(outcome.stdout.starts_with("hi\n"));
    }

    #[test]
    fn nonzero_exit_is_captured_not_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let executor = ProcessExecutor::new(
            vec!["sh".to_string(), "-c".to_string()],
            vec!["uv".to_string(), "run".to_string()],
        );

        let outcome = executor
            .execute(
                &request(
                    "echo broken 1>&2; exit 7",
                    ArtifactKind::Shell,
                    temp.path().to_path_buf(),
                ),
                &CancelToken::new(),
            )
            .expect("execute");

        assert!(!outcome.succeeded());
        assert_eq!(outcome.exit_code, Some(7));
        assert_eq!(outcome.stderr, "broken\n");
    }

    /// Runs the script path with `sh` so the test does not depend on uv
    /// being installed; the temp-file lifecycle is identical.
    #[test]
    fn script_artifact_is_persisted_and_run() {
        let temp = tempfile::tempdir().expect("tempdir");
        let executor = ProcessExecutor::new(
            vec!["sh".to_string(), "-c".to_string()],
            vec!["sh".to_string()],
        );

        let outcome = executor
            .execute(
                &request(
                    "echo from-script",
                    ArtifactKind::Script,
                    temp.path().to_path_buf(),
                ),
                &CancelToken::new(),
            )
            .expect("execute");

        assert!(outcome.succeeded());
        assert_eq!(outcome.stdout, "from-script\n");
    }

    #[test]
    fn timeout_is_not_extended_by_background_children() {
        let temp = tempfile::tempdir().expect("tempdir");
        let executor = ProcessExecutor::new(
            vec!["sh".to_string(), "-c".to_string()],
            vec!["sh".to_string()],
        );

        let mut req = request(
            "sleep 30 & sleep 30",
            ArtifactKind::Shell,
            temp.path().to_path_buf(),
        );
        req.timeout = Duration::from_millis(300);

        let started = std::time::Instant::now();
        let outcome = executor
            .execute(&req, &CancelToken::new())
            .expect("execute");

        assert!(outcome.timed_out);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn empty_shell_argv_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let executor = ProcessExecutor::new(Vec::new(), vec!["sh".to_string()]);

        let err = executor
            .execute(
                &request("echo hi", ArtifactKind::Shell, temp.path().to_path_buf()),
                &CancelToken::new(),
            )
            .unwrap_err();
        assert!(err.to_string().contains("shell command is empty"));
    }
}

//! Helpers for running child processes with timeouts and bounded output.

use std::io::Read;
#[cfg(unix)]
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

use crate::cancel::CancelToken;

/// How often the non-synchronous wait loop checks for cancellation.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Captured child process output.
///
/// `status` is `None` when the child was killed (timeout or cancellation);
/// callers treat the missing exit status as a sentinel, not success.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: Option<ExitStatus>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub duration: Duration,
    pub timed_out: bool,
    pub interrupted: bool,
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs. `output_limit_bytes` bounds the amount of
/// stdout/stderr stored in memory (bytes beyond this are discarded while still draining the pipe).
///
/// When `synchronous` is false the wait is sliced so `cancel` can interrupt a
/// running child; when true the call blocks until the child exits or the full
/// timeout elapses. Either way the child's whole process group is killed and
/// the child reaped before returning, so backgrounded descendants cannot
/// hold the call past its deadline.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes = output_limit_bytes, synchronous = synchronous))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
    synchronous: bool,
    cancel: &CancelToken,
) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    // The child leads a fresh process group so a timeout or cancellation
    // kill reaches backgrounded descendants too. Otherwise orphans keep the
    // output pipes open and the reader joins below outlive the deadline.
    #[cfg(unix)]
    cmd.process_group(0);

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_handle = thread::spawn(move || read_stream_limited(stdout, output_limit_bytes));
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, output_limit_bytes));

    let started = Instant::now();
    let mut timed_out = false;
    let mut interrupted = false;
    let status = loop {
        let remaining = timeout.saturating_sub(started.elapsed());
        if remaining.is_zero() {
            warn!(timeout_secs = timeout.as_secs(), "command timed out, killing");
            timed_out = true;
            kill_and_reap(&mut child)?;
            break None;
        }
        let slice = if synchronous {
            remaining
        } else {
            remaining.min(CANCEL_POLL_INTERVAL)
        };
        match child.wait_timeout(slice).context("wait for command")? {
            Some(status) => break Some(status),
            None => {
                if cancel.is_cancelled() {
                    warn!("cancellation requested, killing command");
                    interrupted = true;
                    kill_and_reap(&mut child)?;
                    break None;
                }
            }
        }
    };
    let duration = started.elapsed();

    let (stdout, stdout_truncated) = join_output(stdout_handle).context("join stdout")?;
    let (stderr, stderr_truncated) = join_output(stderr_handle).context("join stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(
        exit_code = ?status.and_then(|s| s.code()),
        timed_out,
        interrupted,
        "command finished"
    );
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        duration,
        timed_out,
        interrupted,
    })
}

fn kill_and_reap(child: &mut Child) -> Result<()> {
    kill_process_group(child.id());
    child.kill().context("kill command")?;
    child.wait().context("wait command after kill")?;
    Ok(())
}

/// Kill the child's whole process group. The child was spawned as the group
/// leader, so its pid doubles as the pgid.
#[cfg(unix)]
fn kill_process_group(pgid: u32) {
    let result = Command::new("kill")
        .arg("-9")
        .arg("--")
        .arg(format!("-{pgid}"))
        .status();
    match result {
        Ok(status) if !status.success() => {
            warn!(pgid, "kill reported failure for process group");
        }
        Ok(_) => {}
        Err(err) => warn!(pgid, err = %err, "failed to run kill for process group"),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pgid: u32) {}

fn join_output(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn captures_exit_status_and_output() {
        let output = run_command_with_timeout(
            sh("echo out; echo err 1>&2; exit 3"),
            Duration::from_secs(10),
            10_000,
            false,
            &CancelToken::new(),
        )
        .expect("run");

        assert_eq!(output.status.and_then(|s| s.code()), Some(3));
        assert_eq!(output.stdout, b"out\n");
        assert_eq!(output.stderr, b"err\n");
        assert!(!output.timed_out);
        assert!(!output.interrupted);
    }

    #[test]
    fn bounds_output_and_counts_dropped_bytes() {
        let output = run_command_with_timeout(
            sh("printf 'abcdefgh'"),
            Duration::from_secs(10),
            4,
            false,
            &CancelToken::new(),
        )
        .expect("run");

        assert_eq!(output.stdout, b"abcd");
        assert_eq!(output.stdout_truncated, 4);
    }

    #[test]
    fn kills_child_on_timeout() {
        let output = run_command_with_timeout(
            sh("sleep 5"),
            Duration::from_millis(100),
            10_000,
            false,
            &CancelToken::new(),
        )
        .expect("run");

        assert!(output.timed_out);
        assert!(output.status.is_none());
        assert!(output.duration < Duration::from_secs(5));
    }

    #[test]
    fn timeout_kill_reaches_background_descendants() {
        let started = Instant::now();
        let output = run_command_with_timeout(
            sh("sleep 30 & sleep 30"),
            Duration::from_millis(300),
            10_000,
            false,
            &CancelToken::new(),
        )
        .expect("run");

        assert!(output.timed_out);
        assert!(output.status.is_none());
        // The backgrounded sleep holds the output pipes; the group kill must
        // end it too or the reader joins stall until it exits on its own.
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn synchronous_wait_still_enforces_timeout() {
        let output = run_command_with_timeout(
            sh("sleep 5"),
            Duration::from_millis(100),
            10_000,
            true,
            &CancelToken::new(),
        )
        .expect("run");

        assert!(output.timed_out);
        assert!(output.status.is_none());
    }

    #[test]
    fn cancellation_interrupts_running_child() {
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            trigger.cancel();
        });

        let output = run_command_with_timeout(
            sh("sleep 5"),
            Duration::from_secs(30),
            10_000,
            false,
            &cancel,
        )
        .expect("run");
        canceller.join().expect("join canceller");

        assert!(output.interrupted);
        assert!(!output.timed_out);
        assert!(output.status.is_none());
        assert!(output.duration < Duration::from_secs(5));
    }
}

//! Natural-language shell: describe what you want, get it executed.
//!
//! `nlsh list the five largest files here` asks a chat-completions model
//! for a command or script, runs it, judges the result, and retries with
//! the failure context until the instruction is satisfied or the attempt
//! budget runs out.

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use tracing::debug;

use nlsh::cancel::CancelToken;
use nlsh::config::{ArtifactKind, SessionConfig, load_config};
use nlsh::confirm::StdinConfirmer;
use nlsh::evaluate::Verdict;
use nlsh::executor::ProcessExecutor;
use nlsh::exit_codes;
use nlsh::generator::HttpGenerator;
use nlsh::session::{Attempt, RunResult, run_session};

#[derive(Parser, Debug)]
#[command(
    name = "nlsh",
    version,
    about = "Turn a natural-language instruction into an executed command or script"
)]
struct Cli {
    /// What to do, in plain language. Quoting is optional.
    #[arg(required = true, trailing_var_arg = true)]
    instruction: Vec<String>,

    /// Kind of artifact to generate.
    #[arg(short, long, value_enum)]
    kind: Option<ArtifactKind>,

    /// Config namespace to apply on top of the [default] table.
    #[arg(short, long)]
    namespace: Option<String>,

    /// Path to the config file (default: <config dir>/nlsh/config.toml).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Model identifier.
    #[arg(short, long)]
    model: Option<String>,

    /// Provider API key (falls back to NLSH_API_KEY, then OPENAI_API_KEY).
    #[arg(long)]
    api_key: Option<String>,

    /// Maximum number of attempts before giving up.
    #[arg(short = 'i', long)]
    max_attempts: Option<u32>,

    /// Ask before executing each generated artifact.
    #[arg(short, long)]
    confirm: bool,

    /// Judge captured output with the model after a zero exit status.
    #[arg(long, overrides_with = "no_verify")]
    verify: bool,

    /// Treat a zero exit status as success without a model judgement.
    #[arg(long)]
    no_verify: bool,

    /// Keep generated script temp files instead of deleting them.
    #[arg(long)]
    keep_script: bool,

    /// Wait for each execution in a single blocking call.
    #[arg(long)]
    sync: bool,

    /// Per-execution time limit in seconds.
    #[arg(short = 't', long)]
    timeout: Option<u64>,

    /// Directory to execute in.
    #[arg(short, long)]
    workdir: Option<PathBuf>,
}

fn main() {
    nlsh::logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("nlsh: {err:#}");
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let config = resolve_config(&cli)?;
    let instruction = cli.instruction.join(" ");

    let api_key = config
        .api_key
        .as_deref()
        .ok_or_else(|| anyhow!("no API key: pass --api-key, set NLSH_API_KEY, or configure one"))?;
    let generator = HttpGenerator::new(
        &config.api_url,
        &config.model,
        api_key,
        Duration::from_secs(config.request_timeout_secs),
    )
    .context("build generation client")?;
    let executor = ProcessExecutor::from_config(&config);
    let mut confirmer = StdinConfirmer;
    let cancel = CancelToken::new();

    let max_attempts = config.max_attempts;
    let outcome = run_session(
        &generator,
        &executor,
        &mut confirmer,
        &config,
        &instruction,
        &cancel,
        |attempt| report_attempt(attempt, max_attempts),
    )?;

    match outcome.result {
        RunResult::Succeeded => {
            let last = outcome
                .history
                .last()
                .ok_or_else(|| anyhow!("success with empty history"))?;
            // Flushed explicitly: process::exit skips buffered-writer drops.
            let mut stdout = std::io::stdout().lock();
            stdout
                .write_all(last.outcome.stdout.as_bytes())
                .context("write final output")?;
            stdout.flush().context("flush final output")?;
            Ok(exit_codes::OK)
        }
        RunResult::AttemptsExhausted => {
            eprint!("{}", failure_recap(&outcome.history));
            eprintln!("nlsh: gave up after {max_attempts} attempts");
            Ok(exit_codes::EXHAUSTED)
        }
        RunResult::AbortedByUser => {
            eprint!("{}", failure_recap(&outcome.history));
            eprintln!("nlsh: aborted");
            Ok(exit_codes::ABORTED)
        }
        RunResult::RejectedByUser => {
            eprintln!("nlsh: rejected, nothing was executed");
            Ok(exit_codes::REJECTED)
        }
        RunResult::GenerationFailed(detail) => {
            eprint!("{}", failure_recap(&outcome.history));
            eprintln!("nlsh: generation failed: {detail}");
            Ok(exit_codes::GENERATION_FAILED)
        }
    }
}

/// Resolve the session config: file, then CLI flags, then key env fallback.
fn resolve_config(cli: &Cli) -> Result<SessionConfig> {
    let path = match &cli.config {
        Some(path) => path.clone(),
        None => default_config_path()?,
    };
    debug!(path = %path.display(), "loading config");
    let mut config = load_config(&path, cli.namespace.as_deref())?;

    if let Some(kind) = cli.kind {
        config.kind = kind;
    }
    if let Some(model) = &cli.model {
        config.model = model.clone();
    }
    if let Some(api_key) = &cli.api_key {
        config.api_key = Some(api_key.clone());
    }
    if let Some(max_attempts) = cli.max_attempts {
        config.max_attempts = max_attempts;
    }
    if cli.confirm {
        config.confirm = true;
    }
    if cli.verify {
        config.verify = true;
    }
    if cli.no_verify {
        config.verify = false;
    }
    if cli.keep_script {
        config.cleanup_script = false;
    }
    if cli.sync {
        config.synchronous = true;
    }
    if let Some(timeout) = cli.timeout {
        config.exec_timeout_secs = timeout;
    }
    if let Some(workdir) = &cli.workdir {
        config.workdir = workdir.clone();
    }
    config.workdir = std::path::absolute(&config.workdir)
        .with_context(|| format!("resolve workdir {}", config.workdir.display()))?;

    if config.api_key.is_none() {
        config.api_key = std::env::var("NLSH_API_KEY")
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
            .ok()
            .filter(|key| !key.trim().is_empty());
    }

    config.validate()?;
    Ok(config)
}

fn default_config_path() -> Result<PathBuf> {
    let base = dirs::config_dir().ok_or_else(|| anyhow!("no config directory on this platform"))?;
    Ok(base.join("nlsh").join("config.toml"))
}

/// One progress line per attempt, on stderr so stdout stays clean for the
/// final output.
fn report_attempt(attempt: &Attempt, max_attempts: u32) {
    eprintln!(
        "nlsh: attempt {}/{}: {}",
        attempt.index,
        max_attempts,
        verdict_line(&attempt.verdict)
    );
}

fn verdict_line(verdict: &Verdict) -> String {
    match verdict {
        Verdict::Satisfied => "ok".to_string(),
        Verdict::Skipped => "interrupted".to_string(),
        Verdict::Unsatisfied(cause) => cause.to_string(),
    }
}

/// Closing recap of every attempt and why it failed, printed when the
/// session ends without success.
fn failure_recap(history: &[Attempt]) -> String {
    use std::fmt::Write as _;

    let mut recap = String::new();
    for attempt in history {
        let _ = writeln!(
            recap,
            "nlsh: attempt {}: {}",
            attempt.index,
            verdict_line(&attempt.verdict)
        );
        for line in attempt.artifact.lines() {
            let _ = writeln!(recap, "    {line}");
        }
    }
    recap
}

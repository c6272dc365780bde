//! Session configuration resolved from a layered TOML file plus CLI overrides.
//!
//! The file holds a `[default]` table and any number of named namespace
//! tables. Resolution starts from built-in defaults, applies `[default]`,
//! then applies the selected namespace (if any). The resolved
//! [`SessionConfig`] is immutable for the duration of a session.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// What kind of artifact the generator is asked to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    /// A single command line interpreted by the system shell.
    Shell,
    /// A self-contained script run through an isolated-dependency runner.
    Script,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::Shell => write!(f, "shell command"),
            ArtifactKind::Script => write!(f, "script"),
        }
    }
}

/// Resolved settings for one session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Model identifier sent to the generation provider.
    pub model: String,
    /// Chat-completions endpoint URL.
    pub api_url: String,
    /// Provider credential; environment variables fill this in when absent.
    pub api_key: Option<String>,
    pub kind: ArtifactKind,
    /// Attempt budget; the attempt history never grows past this.
    pub max_attempts: u32,
    /// Require human approval before executing each generated artifact.
    pub confirm: bool,
    /// Ask the model to judge captured output after a zero exit status.
    pub verify: bool,
    /// Delete script temp files after execution.
    pub cleanup_script: bool,
    /// Wait for the child in one blocking call instead of a polling wait
    /// that can observe cancellation. Ordering guarantees are identical.
    pub synchronous: bool,
    pub exec_timeout_secs: u64,
    pub request_timeout_secs: u64,
    /// Truncate captured stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
    /// Truncate per-attempt output quoted in retry prompts beyond this many bytes.
    pub prompt_output_limit_bytes: usize,
    /// Shell argv; the artifact is appended as the final argument.
    pub shell: Vec<String>,
    /// Script runner argv (e.g. `["uv", "run"]`); the script path is appended.
    pub script_runner: Vec<String>,
    pub workdir: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            api_url: "https://api.openai.com/v1/chat/completions".to_string(),
            api_key: None,
            kind: ArtifactKind::Script,
            max_attempts: 5,
            confirm: false,
            verify: true,
            cleanup_script: true,
            synchronous: false,
            exec_timeout_secs: 300,
            request_timeout_secs: 120,
            output_limit_bytes: 100_000,
            prompt_output_limit_bytes: 4_000,
            shell: vec!["sh".to_string(), "-c".to_string()],
            script_runner: vec!["uv".to_string(), "run".to_string()],
            workdir: PathBuf::from("."),
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(anyhow!("model must be non-empty"));
        }
        if self.max_attempts == 0 {
            return Err(anyhow!("max_attempts must be > 0"));
        }
        if self.exec_timeout_secs == 0 {
            return Err(anyhow!("exec_timeout_secs must be > 0"));
        }
        if self.request_timeout_secs == 0 {
            return Err(anyhow!("request_timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.prompt_output_limit_bytes == 0 {
            return Err(anyhow!("prompt_output_limit_bytes must be > 0"));
        }
        if self.shell.is_empty() || self.shell[0].trim().is_empty() {
            return Err(anyhow!("shell must be a non-empty array"));
        }
        if self.script_runner.is_empty() || self.script_runner[0].trim().is_empty() {
            return Err(anyhow!("script_runner must be a non-empty array"));
        }
        Ok(())
    }
}

/// One namespace table from the config file. Every field is optional;
/// present fields override the values resolved so far.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConfigOverlay {
    pub model: Option<String>,
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub kind: Option<ArtifactKind>,
    pub max_attempts: Option<u32>,
    pub confirm: Option<bool>,
    pub verify: Option<bool>,
    pub cleanup_script: Option<bool>,
    pub synchronous: Option<bool>,
    pub exec_timeout_secs: Option<u64>,
    pub request_timeout_secs: Option<u64>,
    pub output_limit_bytes: Option<usize>,
    pub prompt_output_limit_bytes: Option<usize>,
    pub shell: Option<Vec<String>>,
    pub script_runner: Option<Vec<String>>,
    pub workdir: Option<PathBuf>,
}

impl ConfigOverlay {
    fn apply(&self, config: &mut SessionConfig) {
        if let Some(model) = &self.model {
            config.model = model.clone();
        }
        if let Some(api_url) = &self.api_url {
            config.api_url = api_url.clone();
        }
        if let Some(api_key) = &self.api_key {
            config.api_key = Some(api_key.clone());
        }
        if let Some(kind) = self.kind {
            config.kind = kind;
        }
        if let Some(max_attempts) = self.max_attempts {
            config.max_attempts = max_attempts;
        }
        if let Some(confirm) = self.confirm {
            config.confirm = confirm;
        }
        if let Some(verify) = self.verify {
            config.verify = verify;
        }
        if let Some(cleanup_script) = self.cleanup_script {
            config.cleanup_script = cleanup_script;
        }
        if let Some(synchronous) = self.synchronous {
            config.synchronous = synchronous;
        }
        if let Some(secs) = self.exec_timeout_secs {
            config.exec_timeout_secs = secs;
        }
        if let Some(secs) = self.request_timeout_secs {
            config.request_timeout_secs = secs;
        }
        if let Some(limit) = self.output_limit_bytes {
            config.output_limit_bytes = limit;
        }
        if let Some(limit) = self.prompt_output_limit_bytes {
            config.prompt_output_limit_bytes = limit;
        }
        if let Some(shell) = &self.shell {
            config.shell = shell.clone();
        }
        if let Some(script_runner) = &self.script_runner {
            config.script_runner = script_runner.clone();
        }
        if let Some(workdir) = &self.workdir {
            config.workdir = workdir.clone();
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    default: ConfigOverlay,
    #[serde(flatten)]
    namespaces: BTreeMap<String, ConfigOverlay>,
}

/// Load and resolve configuration from a TOML file.
///
/// A missing file resolves to built-in defaults, unless a namespace was
/// requested, which only a file can provide.
pub fn load_config(path: &Path, namespace: Option<&str>) -> Result<SessionConfig> {
    if !path.exists() {
        if let Some(ns) = namespace {
            return Err(anyhow!(
                "namespace '{ns}' requested but {} does not exist",
                path.display()
            ));
        }
        debug!(path = %path.display(), "config file missing, using defaults");
        let config = SessionConfig::default();
        config.validate()?;
        return Ok(config);
    }

    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let file: ConfigFile =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;

    let mut config = SessionConfig::default();
    file.default.apply(&mut config);
    if let Some(ns) = namespace {
        let overlay = file.namespaces.get(ns).ok_or_else(|| {
            anyhow!("namespace '{ns}' not found in {}", path.display())
        })?;
        overlay.apply(&mut config);
        debug!(namespace = ns, "applied namespace overlay");
    }
    config.validate()?;
    Ok(config)
}

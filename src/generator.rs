//! Generator Client: the text-generation capability seam.
//!
//! The [`Generator`] trait decouples the session loop from the provider
//! transport. Tests use scripted generators that return predetermined
//! replies without a network dependency; the real implementation is a
//! blocking chat-completions call.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Provider failures. Any of these is fatal to the session: a broken
/// provider is assumed non-recoverable within one invocation, so generation
/// is never retried.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("provider request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("provider returned status {status}: {detail}")]
    Api { status: u16, detail: String },
    #[error("provider returned an empty reply")]
    EmptyReply,
    #[error("malformed provider reply: {0}")]
    MalformedReply(String),
}

/// Abstraction over text-generation backends.
///
/// Stateless across invocations: all corrective context arrives through the
/// rendered prompt, never through hidden provider-side memory.
pub trait Generator {
    fn generate(&self, system: &str, user: &str) -> Result<String, GenerationError>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    stream: bool,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    content: Option<String>,
}

/// Generator backed by an OpenAI-compatible chat-completions endpoint.
pub struct HttpGenerator {
    client: reqwest::blocking::Client,
    api_url: String,
    model: String,
    api_key: String,
}

impl HttpGenerator {
    pub fn new(
        api_url: &str,
        model: &str,
        api_key: &str,
        request_timeout: Duration,
    ) -> Result<Self, GenerationError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(Self {
            client,
            api_url: api_url.to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
        })
    }
}

impl Generator for HttpGenerator {
    #[instrument(skip_all, fields(model = %self.model))]
    fn generate(&self, system: &str, user: &str) -> Result<String, GenerationError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                Message {
                    role: "system",
                    content: system,
                },
                Message {
                    role: "user",
                    content: user,
                },
            ],
            stream: false,
        };

        debug!(prompt_bytes = user.len(), "calling provider");
        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()?;

        let status = response.status();
        let text = response.text()?;
        if !status.is_success() {
            warn!(status = status.as_u16(), "provider returned error status");
            return Err(GenerationError::Api {
                status: status.as_u16(),
                detail: truncate_chars(&text, 200).to_string(),
            });
        }

        let parsed: ChatResponse = serde_json::from_str(&text)
            .map_err(|err| GenerationError::MalformedReply(err.to_string()))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();

        let artifact = strip_code_fences(&content);
        if artifact.is_empty() {
            return Err(GenerationError::EmptyReply);
        }
        debug!(artifact_bytes = artifact.len(), "provider reply accepted");
        Ok(artifact)
    }
}

static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_+-]*\r?\n(.*?)\r?\n?```").expect("fence regex should be valid")
});

/// Extract the artifact text from a provider reply.
///
/// When the reply contains a code fence (with optional language tag), the
/// first fenced block is the artifact and any surrounding commentary is
/// dropped; otherwise the whole trimmed reply is taken verbatim.
pub fn strip_code_fences(reply: &str) -> String {
    let trimmed = reply.trim();
    if let Some(caps) = FENCE_RE.captures(trimmed) {
        return caps[1].trim().to_string();
    }
    trimmed.to_string()
}

/// Truncate a string for display (Unicode-safe).
fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_fence_with_language_tag() {
        let reply = "```python\nprint(1)\n```";
        assert_eq!(strip_code_fences(reply), "print(1)");
    }

    #[test]
    fn strips_bare_fence() {
        let reply = "```\nls -la\n```";
        assert_eq!(strip_code_fences(reply), "ls -la");
    }

    #[test]
    fn drops_commentary_around_a_fence() {
        let reply = "```sh\nls\n``` This lists files.";
        assert_eq!(strip_code_fences(reply), "ls");

        let reply = "Here you go:\n```\ndu -sh .\n```\nLet me know!";
        assert_eq!(strip_code_fences(reply), "du -sh .");
    }

    #[test]
    fn takes_the_first_of_several_fences() {
        let reply = "```\nls\n```\nor alternatively\n```\nls -la\n```";
        assert_eq!(strip_code_fences(reply), "ls");
    }

    #[test]
    fn leaves_unfenced_reply_trimmed() {
        assert_eq!(strip_code_fences("  du -sh .  \n"), "du -sh .");
    }

    #[test]
    fn keeps_interior_backticks() {
        let reply = "echo '```not a fence```'";
        assert_eq!(strip_code_fences(reply), reply);
    }

    #[test]
    fn fenced_empty_reply_becomes_empty() {
        assert_eq!(strip_code_fences("```\n\n```"), "");
    }

    #[test]
    fn truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("hi", 10), "hi");
    }
}

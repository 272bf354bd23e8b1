//! Text completion providers.
//!
//! [`TextCompletion`] is the seam between planning and whatever model
//! backend is configured. [`CommandCompletion`] pipes the prompt to an
//! external CLI (`codex exec` by default) and reads the reply from stdout.
//! Tests use scripted completions instead of spawning processes.

use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use tracing::{info, instrument, warn};

use crate::io::process::run_command_with_timeout;

/// Sampling options passed through to the provider.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_tokens: 4096,
        }
    }
}

/// One model reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub tokens_used: u64,
    pub cost: f64,
}

impl Completion {
    pub fn text(text: impl Into<String>) -> Self {
        let text = text.into();
        let tokens_used = approximate_tokens(&text);
        Self {
            text,
            tokens_used,
            cost: 0.0,
        }
    }
}

/// A model backend that turns a prompt into text.
#[async_trait]
pub trait TextCompletion: Send + Sync {
    /// Human-readable provider name for metrics and logs.
    fn name(&self) -> &str;
    async fn generate(&self, prompt: &str, options: &CompletionOptions) -> Result<Completion>;
}

/// Provider backed by an external command that reads the prompt on stdin.
///
/// `{temperature}` and `{max_tokens}` in arguments are replaced per call.
#[derive(Debug, Clone)]
pub struct CommandCompletion {
    name: String,
    program: String,
    args: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandCompletion {
    /// `command` is the program followed by its arguments.
    pub fn new(
        name: impl Into<String>,
        command: &[String],
        timeout: Duration,
        output_limit_bytes: usize,
    ) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| anyhow!("provider command must not be empty"))?;
        Ok(Self {
            name: name.into(),
            program: program.clone(),
            args: args.to_vec(),
            timeout,
            output_limit_bytes,
        })
    }

    fn build_command(&self, options: &CompletionOptions) -> Command {
        let mut cmd = Command::new(&self.program);
        for arg in &self.args {
            cmd.arg(
                arg.replace("{temperature}", &options.temperature.to_string())
                    .replace("{max_tokens}", &options.max_tokens.to_string()),
            );
        }
        cmd
    }
}

#[async_trait]
impl TextCompletion for CommandCompletion {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip_all, fields(provider = %self.name, prompt_bytes = prompt.len()))]
    async fn generate(&self, prompt: &str, options: &CompletionOptions) -> Result<Completion> {
        info!(program = %self.program, "requesting completion");
        let cmd = self.build_command(options);
        let input = prompt.as_bytes().to_vec();
        let timeout = self.timeout;
        let limit = self.output_limit_bytes;

        let output = tokio::task::spawn_blocking(move || {
            run_command_with_timeout(cmd, Some(input), timeout, limit)
        })
        .await
        .context("join completion process")?
        .with_context(|| format!("run provider {}", self.name))?;

        if output.timed_out {
            warn!(timeout_secs = timeout.as_secs(), "provider timed out");
            return Err(anyhow!("provider {} timed out after {:?}", self.name, timeout));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "provider failed");
            return Err(anyhow!(
                "provider {} exited with status {:?}: {}",
                self.name,
                output.status.code(),
                output.stderr_tail(400)
            ));
        }

        let text = output.stdout_text();
        if text.trim().is_empty() {
            return Err(anyhow!("provider {} returned no output", self.name));
        }
        let tokens_used = approximate_tokens(prompt) + approximate_tokens(&text);
        Ok(Completion {
            text,
            tokens_used,
            cost: 0.0,
        })
    }
}

/// Rough token count: four bytes per token.
pub fn approximate_tokens(text: &str) -> u64 {
    (text.len() as u64).div_ceil(4)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn command(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|part| part.to_string()).collect()
    }

    #[tokio::test]
    async fn pipes_prompt_through_command() {
        let provider = CommandCompletion::new(
            "cat",
            &command(&["cat"]),
            Duration::from_secs(5),
            1 << 20,
        )
        .expect("provider");
        let completion = provider
            .generate("{\"steps\": []}", &CompletionOptions::default())
            .await
            .expect("generate");
        assert_eq!(completion.text, "{\"steps\": []}");
        assert!(completion.tokens_used > 0);
    }

    #[tokio::test]
    async fn substitutes_sampling_placeholders() {
        let provider = CommandCompletion::new(
            "echo",
            &command(&["sh", "-c", "echo t={temperature} m={max_tokens}"]),
            Duration::from_secs(5),
            1024,
        )
        .expect("provider");
        let options = CompletionOptions {
            temperature: 0.5,
            max_tokens: 128,
        };
        let completion = provider.generate("", &options).await.expect("generate");
        assert_eq!(completion.text.trim(), "t=0.5 m=128");
    }

    #[tokio::test]
    async fn nonzero_exit_is_an_error() {
        let provider = CommandCompletion::new(
            "failing",
            &command(&["sh", "-c", "echo rate limited >&2; exit 1"]),
            Duration::from_secs(5),
            1024,
        )
        .expect("provider");
        let err = provider
            .generate("prompt", &CompletionOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("rate limited"), "{err}");
    }

    #[test]
    fn empty_command_is_rejected() {
        assert!(CommandCompletion::new("x", &[], Duration::from_secs(1), 1).is_err());
    }
}

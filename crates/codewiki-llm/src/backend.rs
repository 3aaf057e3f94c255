//! Backend trait and failure classification

use crate::types::{ChatMessage, ChatOutcome, ToolSpec};
use rand::Rng;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Why a single backend attempt (or the whole backend) failed.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("http {status}: {body}")]
    Http { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out")]
    Timeout,

    #[error("empty response")]
    Empty,

    #[error("failed to spawn agent command: {0}")]
    Spawn(String),

    #[error("agent command exited with {code:?}: {stderr}")]
    Process { code: Option<i32>, stderr: String },

    #[error("backend does not support tool calls")]
    Unsupported,

    #[error("cancelled")]
    Cancelled,
}

impl BackendError {
    /// Worth another attempt against the same backend?
    pub fn retryable(&self) -> bool {
        match self {
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            Self::Transport(_) | Self::Timeout => true,
            _ => false,
        }
    }
}

/// Exponential backoff with full jitter, bounded per attempt.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Upper bound of the sleep before retry `attempt` (0-based).
    pub fn max_delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt));
        exp.min(self.max_delay)
    }

    /// Sampled sleep before retry `attempt`: uniform over [0, bound].
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let bound = self.max_delay_for(attempt).as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(0..=bound))
    }
}

/// One way of turning a prompt into text. Implementations are tried in
/// cascade order by the gateway.
#[async_trait::async_trait]
pub trait LlmBackend: Send + Sync {
    /// Stable label for error reports and usage metadata.
    fn label(&self) -> String;

    /// Plain completion: prompt in, text out.
    async fn complete(
        &self,
        prompt: &str,
        max_tokens: u64,
        cancel: &CancellationToken,
    ) -> Result<String, BackendError>;

    /// Whether [`LlmBackend::chat`] is available.
    fn supports_tools(&self) -> bool {
        false
    }

    /// Tool-enabled chat turn over a full message history.
    async fn chat(
        &self,
        _messages: &[ChatMessage],
        _tools: &[ToolSpec],
        _max_tokens: u64,
        _cancel: &CancellationToken,
    ) -> Result<ChatOutcome, BackendError> {
        Err(BackendError::Unsupported)
    }
}

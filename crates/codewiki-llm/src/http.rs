//! Chat-completions HTTP backend

use crate::backend::{BackendError, LlmBackend, RetryPolicy};
use crate::types::{ChatMessage, ChatOutcome, ToolCallRequest, ToolSpec};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(300);

/// One model behind a chat-completions endpoint. The cascade instantiates one
/// of these per configured model, all sharing a `reqwest::Client`.
pub struct HttpBackend {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    retry: RetryPolicy,
}

impl HttpBackend {
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    async fn post_once(&self, body: &serde_json::Value) -> Result<ChoiceMessage, BackendError> {
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .timeout(ATTEMPT_TIMEOUT)
            .json(body)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        let text = response.text().await.map_err(classify_transport)?;
        if !status.is_success() {
            return Err(BackendError::Http {
                status: status.as_u16(),
                body: truncate(&text, 500),
            });
        }

        let parsed: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| BackendError::Transport(format!("malformed response: {e}")))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or(BackendError::Empty)
    }

    /// Retry loop around a single request body. Cancellation is honored at
    /// attempt boundaries.
    async fn send_with_retries(
        &self,
        body: serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<ChoiceMessage, BackendError> {
        let mut attempt = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(BackendError::Cancelled);
            }
            match self.post_once(&body).await {
                Ok(message) => return Ok(message),
                Err(err) if err.retryable() && attempt + 1 < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        model = %self.model,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "retrying after {err}"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => return Err(BackendError::Cancelled),
                    }
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[async_trait::async_trait]
impl LlmBackend for HttpBackend {
    fn label(&self) -> String {
        self.model.clone()
    }

    async fn complete(
        &self,
        prompt: &str,
        max_tokens: u64,
        cancel: &CancellationToken,
    ) -> Result<String, BackendError> {
        let body = serde_json::to_value(ChatRequest {
            model: &self.model,
            messages: &[ChatMessage::user(prompt)],
            max_tokens,
            temperature: 0.0,
            stream: false,
            tools: None,
        })
        .map_err(|e| BackendError::Transport(e.to_string()))?;

        debug!(model = %self.model, max_tokens, "chat-completions request");
        let message = self.send_with_retries(body, cancel).await?;
        match message.content {
            Some(content) if !content.is_empty() => Ok(content),
            _ => Err(BackendError::Empty),
        }
    }

    fn supports_tools(&self) -> bool {
        true
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
        max_tokens: u64,
        cancel: &CancellationToken,
    ) -> Result<ChatOutcome, BackendError> {
        let wire_tools: Vec<ToolWire> = tools.iter().map(ToolWire::from).collect();
        let body = serde_json::to_value(ChatRequest {
            model: &self.model,
            messages,
            max_tokens,
            temperature: 0.0,
            stream: false,
            tools: if wire_tools.is_empty() {
                None
            } else {
                Some(wire_tools)
            },
        })
        .map_err(|e| BackendError::Transport(e.to_string()))?;

        debug!(model = %self.model, turns = messages.len(), "tool chat request");
        let message = self.send_with_retries(body, cancel).await?;
        let tool_calls: Vec<ToolCallRequest> = message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|c| ToolCallRequest {
                id: c.id,
                name: c.function.name,
                arguments: c.function.arguments,
            })
            .collect();
        let text = message.content.unwrap_or_default();
        if text.is_empty() && tool_calls.is_empty() {
            return Err(BackendError::Empty);
        }
        Ok(ChatOutcome { text, tool_calls })
    }
}

fn classify_transport(err: reqwest::Error) -> BackendError {
    if err.is_timeout() {
        BackendError::Timeout
    } else {
        BackendError::Transport(err.to_string())
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        text.to_string()
    } else {
        let cut = text
            .char_indices()
            .take_while(|(i, _)| *i < max)
            .last()
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(0);
        format!("{}…", &text[..cut])
    }
}

// Wire shapes for the chat-completions contract.

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u64,
    temperature: f32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ToolWire>>,
}

#[derive(Serialize)]
struct ToolWire {
    #[serde(rename = "type")]
    kind: &'static str,
    function: FunctionWire,
}

#[derive(Serialize)]
struct FunctionWire {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

impl From<&ToolSpec> for ToolWire {
    fn from(spec: &ToolSpec) -> Self {
        Self {
            kind: "function",
            function: FunctionWire {
                name: spec.name.clone(),
                description: spec.description.clone(),
                parameters: spec.parameters.clone(),
            },
        }
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Deserialize)]
struct WireFunction {
    name: String,
    arguments: String,
}

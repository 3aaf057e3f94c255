//! Backend cascade
//!
//! Backends are tried strictly in order; the first success wins and every
//! failure is recorded so an exhausted cascade can report the whole story.

use crate::backend::{BackendError, LlmBackend};
use crate::http::HttpBackend;
use crate::subprocess::SubprocessBackend;
use crate::types::{ChatMessage, ChatOutcome, Purpose, ToolSpec};
use codewiki_core::EngineConfig;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// One failed backend in cascade order.
#[derive(Clone, Debug)]
pub struct BackendAttempt {
    pub backend: String,
    pub error: String,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("all {} backend(s) failed: {}", .attempts.len(), summarize(.attempts))]
    Exhausted { attempts: Vec<BackendAttempt> },

    #[error("no configured backend supports tool calls")]
    NoToolBackend,

    #[error("cancelled")]
    Cancelled,
}

fn summarize(attempts: &[BackendAttempt]) -> String {
    attempts
        .iter()
        .map(|a| format!("{}: {}", a.backend, a.error))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Response token caps per purpose.
#[derive(Clone, Copy, Debug)]
pub struct TokenCaps {
    pub cluster: u64,
    pub doc: u64,
}

impl TokenCaps {
    pub fn for_purpose(&self, purpose: Purpose) -> u64 {
        match purpose {
            Purpose::Cluster => self.cluster,
            Purpose::LeafDoc | Purpose::Overview | Purpose::Translate => self.doc,
        }
    }
}

/// Provider-abstract request channel with a fallback cascade.
pub struct LlmGateway {
    backends: Vec<Arc<dyn LlmBackend>>,
    caps: TokenCaps,
    used: Mutex<BTreeSet<String>>,
}

impl LlmGateway {
    pub fn new(backends: Vec<Arc<dyn LlmBackend>>, caps: TokenCaps) -> Self {
        Self {
            backends,
            caps,
            used: Mutex::new(BTreeSet::new()),
        }
    }

    /// Build the cascade from configuration: the agent command first when
    /// set, then the primary model, then each fallback model.
    pub fn from_config(config: &EngineConfig) -> Self {
        let mut backends: Vec<Arc<dyn LlmBackend>> = Vec::new();
        if let Some(cmd) = config.agent_cmd.as_deref().filter(|c| !c.trim().is_empty()) {
            backends.push(Arc::new(SubprocessBackend::new(cmd)));
        }
        if !config.main_model.is_empty() && !config.base_url.is_empty() {
            let client = reqwest::Client::new();
            backends.push(Arc::new(HttpBackend::new(
                client.clone(),
                &config.base_url,
                &config.api_key,
                &config.main_model,
            )));
            for model in &config.fallback_models {
                backends.push(Arc::new(HttpBackend::new(
                    client.clone(),
                    &config.base_url,
                    &config.api_key,
                    model,
                )));
            }
        }
        Self::new(
            backends,
            TokenCaps {
                cluster: config.max_token_per_module,
                doc: config.max_tokens,
            },
        )
    }

    /// Backends that served at least one successful request this run.
    pub fn backends_used(&self) -> Vec<String> {
        self.used
            .lock()
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn mark_used(&self, label: &str) {
        if let Ok(mut set) = self.used.lock() {
            set.insert(label.to_string());
        }
    }

    /// Plain completion through the cascade.
    pub async fn complete(
        &self,
        prompt: &str,
        purpose: Purpose,
        cancel: &CancellationToken,
    ) -> Result<String, GatewayError> {
        let max_tokens = self.caps.for_purpose(purpose);
        let mut attempts = Vec::new();
        for backend in &self.backends {
            let label = backend.label();
            debug!(backend = %label, %purpose, "gateway attempt");
            match backend.complete(prompt, max_tokens, cancel).await {
                Ok(text) => {
                    self.mark_used(&label);
                    return Ok(text);
                }
                Err(BackendError::Cancelled) => return Err(GatewayError::Cancelled),
                Err(err) => {
                    warn!(backend = %label, %purpose, "backend failed: {err}");
                    attempts.push(BackendAttempt {
                        backend: label,
                        error: err.to_string(),
                    });
                }
            }
        }
        Err(GatewayError::Exhausted { attempts })
    }

    /// Tool-enabled chat turn through the tool-capable part of the cascade.
    pub async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
        purpose: Purpose,
        cancel: &CancellationToken,
    ) -> Result<ChatOutcome, GatewayError> {
        let max_tokens = self.caps.for_purpose(purpose);
        let mut attempts = Vec::new();
        let mut any_tool_backend = false;
        for backend in &self.backends {
            if !backend.supports_tools() {
                continue;
            }
            any_tool_backend = true;
            let label = backend.label();
            match backend.chat(messages, tools, max_tokens, cancel).await {
                Ok(outcome) => {
                    self.mark_used(&label);
                    return Ok(outcome);
                }
                Err(BackendError::Cancelled) => return Err(GatewayError::Cancelled),
                Err(err) => {
                    warn!(backend = %label, "tool chat failed: {err}");
                    attempts.push(BackendAttempt {
                        backend: label,
                        error: err.to_string(),
                    });
                }
            }
        }
        if !any_tool_backend {
            return Err(GatewayError::NoToolBackend);
        }
        Err(GatewayError::Exhausted { attempts })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedBackend {
        label: String,
        fail: bool,
        calls: AtomicUsize,
    }

    impl ScriptedBackend {
        fn new(label: &str, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                label: label.into(),
                fail,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait::async_trait]
    impl LlmBackend for ScriptedBackend {
        fn label(&self) -> String {
            self.label.clone()
        }

        async fn complete(
            &self,
            prompt: &str,
            _max_tokens: u64,
            _cancel: &CancellationToken,
        ) -> Result<String, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(BackendError::Http {
                    status: 500,
                    body: "boom".into(),
                })
            } else {
                Ok(format!("{}:{}", self.label, prompt))
            }
        }
    }

    fn caps() -> TokenCaps {
        TokenCaps {
            cluster: 2048,
            doc: 8192,
        }
    }

    #[tokio::test]
    async fn first_success_wins() {
        let primary = ScriptedBackend::new("primary", false);
        let fallback = ScriptedBackend::new("fallback", false);
        let gateway = LlmGateway::new(vec![primary.clone(), fallback.clone()], caps());
        let cancel = CancellationToken::new();

        let out = gateway.complete("p", Purpose::LeafDoc, &cancel).await.unwrap();
        assert_eq!(out, "primary:p");
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 0);
        assert_eq!(gateway.backends_used(), vec!["primary".to_string()]);
    }

    #[tokio::test]
    async fn cascade_falls_through_in_order() {
        let primary = ScriptedBackend::new("primary", true);
        let fallback = ScriptedBackend::new("fallback", false);
        let gateway = LlmGateway::new(vec![primary.clone(), fallback.clone()], caps());
        let cancel = CancellationToken::new();

        let out = gateway.complete("p", Purpose::Cluster, &cancel).await.unwrap();
        assert_eq!(out, "fallback:p");
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
        assert_eq!(gateway.backends_used(), vec!["fallback".to_string()]);
    }

    #[tokio::test]
    async fn exhaustion_reports_every_backend_in_order() {
        let a = ScriptedBackend::new("a", true);
        let b = ScriptedBackend::new("b", true);
        let gateway = LlmGateway::new(vec![a, b], caps());
        let cancel = CancellationToken::new();

        let err = gateway.complete("p", Purpose::LeafDoc, &cancel).await.unwrap_err();
        match err {
            GatewayError::Exhausted { attempts } => {
                let order: Vec<&str> = attempts.iter().map(|a| a.backend.as_str()).collect();
                assert_eq!(order, ["a", "b"]);
                assert!(attempts[0].error.contains("500"));
            }
            other => panic!("expected exhaustion, got {other}"),
        }
    }

    #[tokio::test]
    async fn chat_needs_a_tool_capable_backend() {
        let a = ScriptedBackend::new("a", false); // supports_tools() == false
        let gateway = LlmGateway::new(vec![a], caps());
        let cancel = CancellationToken::new();

        let err = gateway.chat(&[], &[], Purpose::LeafDoc, &cancel).await.unwrap_err();
        assert!(matches!(err, GatewayError::NoToolBackend));
    }

    #[test]
    fn purpose_selects_the_cap() {
        let caps = caps();
        assert_eq!(caps.for_purpose(Purpose::Cluster), 2048);
        assert_eq!(caps.for_purpose(Purpose::LeafDoc), 8192);
        assert_eq!(caps.for_purpose(Purpose::Overview), 8192);
        assert_eq!(caps.for_purpose(Purpose::Translate), 8192);
    }
}

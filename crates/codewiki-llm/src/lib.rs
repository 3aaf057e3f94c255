//! LLM gateway: provider-abstract completions with a backend cascade.
//!
//! Two transports are supported — a chat-completions HTTP endpoint and a
//! child process driven over stdio. Requests carry a [`Purpose`] that only
//! selects the response token cap; everything else is uniform.

pub mod backend;
pub mod gateway;
pub mod http;
pub mod subprocess;
pub mod types;

pub use backend::{BackendError, LlmBackend, RetryPolicy};
pub use gateway::{BackendAttempt, GatewayError, LlmGateway, TokenCaps};
pub use http::HttpBackend;
pub use subprocess::SubprocessBackend;
pub use types::{ChatMessage, ChatOutcome, Purpose, ToolCallRequest, ToolSpec};

//! Request/response types for the gateway

use serde::{Deserialize, Serialize};

/// What a request is for. The gateway uses this only to pick the response
/// token cap.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Purpose {
    Cluster,
    LeafDoc,
    Overview,
    Translate,
}

impl std::fmt::Display for Purpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cluster => write!(f, "cluster"),
            Self::LeafDoc => write!(f, "leaf_doc"),
            Self::Overview => write!(f, "overview"),
            Self::Translate => write!(f, "translate"),
        }
    }
}

/// One message of a chat-completions conversation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallRequest>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
            tool_calls: if tool_calls.is_empty() {
                None
            } else {
                Some(tool_calls)
            },
            tool_call_id: None,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: "tool".into(),
            content: content.into(),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

/// A tool the model may call, in JSON Schema form.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// A tool call returned by the model. `arguments` is the raw JSON string as
/// sent on the wire; parsing is the caller's concern.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl ToolCallRequest {
    pub fn parse_arguments(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_str(&self.arguments)
    }
}

/// Outcome of one tool-enabled chat turn.
#[derive(Clone, Debug, Default)]
pub struct ChatOutcome {
    pub text: String,
    pub tool_calls: Vec<ToolCallRequest>,
}

impl ChatOutcome {
    /// Terminal when the model produced no further tool calls.
    pub fn is_terminal(&self) -> bool {
        self.tool_calls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_result_carries_call_id() {
        let msg = ChatMessage::tool_result("call_1", "ok");
        assert_eq!(msg.role, "tool");
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn empty_tool_calls_are_not_serialized() {
        let msg = ChatMessage::assistant("hello", vec![]);
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("tool_calls"));
    }

    #[test]
    fn arguments_parse_as_json() {
        let call = ToolCallRequest {
            id: "c1".into(),
            name: "read".into(),
            arguments: r#"{"ids":["a"]}"#.into(),
        };
        let value = call.parse_arguments().unwrap();
        assert_eq!(value["ids"][0], "a");
    }
}

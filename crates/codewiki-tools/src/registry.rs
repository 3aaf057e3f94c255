//! Tool trait and registry
//!
//! Each tool is a self-contained module implementing the DocTool trait.
//! Tool failures are values, not errors: the agent receives the message as a
//! plain-text result and is expected to adapt.

use codewiki_llm::ToolSpec;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone, Debug)]
pub enum ToolResult {
    Text(String),
    Error(String),
}

impl ToolResult {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    pub fn error(s: impl Into<String>) -> Self {
        Self::Error(s.into())
    }

    pub fn to_content_string(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Error(e) => format!("Error: {}", e),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

/// A capability exposed to the documentation agent.
#[async_trait::async_trait]
pub trait DocTool: Send + Sync {
    /// Unique tool name as it appears in the manifest.
    fn name(&self) -> &str;

    /// Human-readable description sent to the LLM.
    fn description(&self) -> &str;

    /// System prompt fragment for this tool (injected into the agent's
    /// instructions). Empty by default.
    fn prompt(&self) -> &str {
        ""
    }

    /// JSON Schema for input parameters.
    fn input_schema(&self) -> Value;

    /// Execute the tool with the given arguments.
    async fn execute(&self, args: Value) -> ToolResult;

    fn to_spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.input_schema(),
        }
    }
}

pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn DocTool>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: impl DocTool + 'static) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn DocTool>> {
        self.tools.get(name).cloned()
    }

    pub async fn execute(&self, name: &str, args: Value) -> ToolResult {
        match self.tools.get(name) {
            Some(tool) => tool.execute(args).await,
            None => ToolResult::Error(format!("Tool not found: {}", name)),
        }
    }

    /// Tool manifest for the LLM request.
    pub fn specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self.tools.values().map(|t| t.to_spec()).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    /// System prompt fragments from every registered tool.
    pub fn combined_prompts(&self) -> String {
        let mut fragments: Vec<(&str, &str)> = self
            .tools
            .values()
            .map(|t| (t.name(), t.prompt()))
            .filter(|(_, p)| !p.is_empty())
            .collect();
        fragments.sort();
        fragments
            .into_iter()
            .map(|(_, p)| p)
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort();
        names
    }
}

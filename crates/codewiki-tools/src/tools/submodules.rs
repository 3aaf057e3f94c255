//! generate_sub_module_documentation — recursive descent for complex modules
//!
//! The tool layer cannot depend on the engine, so the actual generator is
//! injected through a shared handle after construction, the same way the
//! runtime is wired into spawning tools elsewhere in this workspace.

use crate::registry::{DocTool, ToolResult};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Implemented by the engine: generate documentation for the named children
/// of the module currently being documented.
#[async_trait::async_trait]
pub trait SubmoduleGenerator: Send + Sync {
    async fn generate(&self, child_names: &[String]) -> Result<String, String>;
}

/// Shared handle set once the engine's orchestrator exists. Breaks the
/// circular dependency: tools need the generator, the generator needs tools.
pub type GeneratorHandle = Arc<RwLock<Option<Arc<dyn SubmoduleGenerator>>>>;

pub fn generator_handle() -> GeneratorHandle {
    Arc::new(RwLock::new(None))
}

pub struct GenerateSubmodulesTool {
    generator: GeneratorHandle,
}

impl GenerateSubmodulesTool {
    pub fn new(generator: GeneratorHandle) -> Self {
        Self { generator }
    }
}

#[async_trait::async_trait]
impl DocTool for GenerateSubmodulesTool {
    fn name(&self) -> &str {
        "generate_sub_module_documentation"
    }

    fn description(&self) -> &str {
        "Generate the documentation for one or more direct child modules of \
         the current module. Use this before writing the parent document so \
         the children can be summarized from their finished docs."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "module_names": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Names of direct child modules to document"
                }
            },
            "required": ["module_names"]
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let names: Vec<String> = match args.get("module_names").and_then(|v| v.as_array()) {
            Some(values) => {
                let mut names = Vec::with_capacity(values.len());
                for value in values {
                    match value.as_str() {
                        Some(name) => names.push(name.to_string()),
                        None => return ToolResult::error("module_names must be strings"),
                    }
                }
                names
            }
            None => return ToolResult::error("Missing required parameter: module_names"),
        };
        if names.is_empty() {
            return ToolResult::error("module_names must not be empty");
        }

        let generator = {
            let guard = self.generator.read().await;
            guard.clone()
        };
        let Some(generator) = generator else {
            return ToolResult::error("sub-module generation is not available yet");
        };

        info!(children = names.len(), "generating sub-module documentation");
        match generator.generate(&names).await {
            Ok(confirmation) => ToolResult::text(confirmation),
            Err(message) => ToolResult::error(message),
        }
    }
}

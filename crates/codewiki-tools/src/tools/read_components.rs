//! read_code_components — source bodies on demand
//!
//! The cluster step and the module prompt only carry names and paths; the
//! agent pulls full definitions through this tool when it needs them.

use crate::registry::{DocTool, ToolResult};
use codewiki_core::ComponentMap;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

pub struct ReadComponentsTool {
    components: Arc<ComponentMap>,
}

impl ReadComponentsTool {
    pub fn new(components: Arc<ComponentMap>) -> Self {
        Self { components }
    }
}

#[async_trait::async_trait]
impl DocTool for ReadComponentsTool {
    fn name(&self) -> &str {
        "read_code_components"
    }

    fn description(&self) -> &str {
        "Read the full source code of one or more components by id. Returns \
         the concatenated definitions with a header per component."
    }

    fn prompt(&self) -> &str {
        "Use read_code_components to inspect implementations before \
         describing them. Request several ids in one call when possible."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "component_ids": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Component ids to read"
                }
            },
            "required": ["component_ids"]
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let ids = match args.get("component_ids").and_then(|v| v.as_array()) {
            Some(ids) => ids,
            None => return ToolResult::error("Missing required parameter: component_ids"),
        };
        if ids.is_empty() {
            return ToolResult::error("component_ids must not be empty");
        }

        let mut sections = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(id) = id.as_str() else {
                return ToolResult::error("component_ids must be strings");
            };
            match self.components.get(id) {
                Some(component) => sections.push(format!(
                    "=== {} ({}:{}-{}) ===\n{}",
                    component.id,
                    component.file_path,
                    component.start_line,
                    component.end_line,
                    component.source_code
                )),
                None => sections.push(format!("=== {} ===\n(unknown component id)", id)),
            }
        }
        debug!(count = ids.len(), "read_code_components");
        ToolResult::text(sections.join("\n\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codewiki_core::{Component, ComponentKind};
    use std::collections::BTreeSet;

    fn map() -> Arc<ComponentMap> {
        let mut map = ComponentMap::new();
        map.insert(
            "m.f".to_string(),
            Component {
                id: "m.f".into(),
                kind: ComponentKind::Function,
                file_path: "src/m.rs".into(),
                start_line: 3,
                end_line: 5,
                source_code: "fn f() {}".into(),
                depends_on: BTreeSet::new(),
                token_estimate: 0,
            },
        );
        Arc::new(map)
    }

    #[tokio::test]
    async fn concatenates_with_headers() {
        let tool = ReadComponentsTool::new(map());
        let result = tool
            .execute(json!({"component_ids": ["m.f"]}))
            .await;
        let text = result.to_content_string();
        assert!(text.contains("=== m.f (src/m.rs:3-5) ==="));
        assert!(text.contains("fn f() {}"));
    }

    #[tokio::test]
    async fn unknown_ids_are_reported_inline() {
        let tool = ReadComponentsTool::new(map());
        let result = tool
            .execute(json!({"component_ids": ["m.f", "ghost"]}))
            .await;
        assert!(!result.is_error());
        assert!(result.to_content_string().contains("unknown component id"));
    }

    #[tokio::test]
    async fn missing_parameter_is_an_error() {
        let tool = ReadComponentsTool::new(map());
        assert!(tool.execute(json!({})).await.is_error());
    }
}

//! Tests for codewiki-tools: registry dispatch and tool manifests

use codewiki_core::{Component, ComponentKind, ComponentMap};
use codewiki_tools::*;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use tempfile::TempDir;

fn sample_components() -> Arc<ComponentMap> {
    let mut map = ComponentMap::new();
    map.insert(
        "lib.rs::parse".to_string(),
        Component {
            id: "lib.rs::parse".into(),
            kind: ComponentKind::Function,
            file_path: "src/lib.rs".into(),
            start_line: 10,
            end_line: 30,
            source_code: "pub fn parse(input: &str) -> Ast { todo!() }".into(),
            depends_on: BTreeSet::new(),
            token_estimate: 0,
        },
    );
    Arc::new(map)
}

// ===========================================================================
// Registry
// ===========================================================================

#[tokio::test]
async fn simple_registry_has_two_tools() {
    let docs = TempDir::new().unwrap();
    let repo = TempDir::new().unwrap();
    let registry = create_doc_registry(sample_components(), docs.path(), repo.path());
    assert_eq!(
        registry.list(),
        vec!["read_code_components", "str_replace_editor"]
    );
}

#[tokio::test]
async fn complex_registry_adds_submodule_generation() {
    let docs = TempDir::new().unwrap();
    let repo = TempDir::new().unwrap();
    let registry = create_complex_registry(
        sample_components(),
        docs.path(),
        repo.path(),
        generator_handle(),
    );
    assert!(registry
        .list()
        .contains(&"generate_sub_module_documentation"));
}

#[tokio::test]
async fn unknown_tool_is_a_soft_error() {
    let registry = ToolRegistry::new();
    let result = registry.execute("nonexistent", json!({})).await;
    assert!(result.is_error());
    assert!(result.to_content_string().contains("Tool not found"));
}

#[tokio::test]
async fn specs_expose_json_schemas() {
    let docs = TempDir::new().unwrap();
    let repo = TempDir::new().unwrap();
    let registry = create_doc_registry(sample_components(), docs.path(), repo.path());
    let specs = registry.specs();
    assert_eq!(specs.len(), 2);
    for spec in &specs {
        assert_eq!(spec.parameters["type"], "object");
        assert!(!spec.description.is_empty());
    }
}

// ===========================================================================
// End-to-end through the registry
// ===========================================================================

#[tokio::test]
async fn read_then_write_through_the_registry() {
    let docs = TempDir::new().unwrap();
    let repo = TempDir::new().unwrap();
    let registry = create_doc_registry(sample_components(), docs.path(), repo.path());

    let read = registry
        .execute(
            "read_code_components",
            json!({"component_ids": ["lib.rs::parse"]}),
        )
        .await;
    assert!(read.to_content_string().contains("pub fn parse"));

    let write = registry
        .execute(
            "str_replace_editor",
            json!({"op": "create", "path": "parse.md", "file_text": "# parse\n\nEntry point.\n"}),
        )
        .await;
    assert!(!write.is_error());
    let written = std::fs::read_to_string(docs.path().join("parse.md")).unwrap();
    assert!(written.starts_with("# parse"));
}

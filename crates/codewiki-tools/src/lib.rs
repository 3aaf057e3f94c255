//! Agent tools for documentation generation.
//!
//! The registry exposes three capabilities to the tool-enabled agent:
//! reading component sources, editing files under the docs directory, and
//! recursing into child modules.

pub mod registry;
pub mod tools;

pub use registry::{DocTool, ToolRegistry, ToolResult};
pub use tools::{
    generator_handle, GenerateSubmodulesTool, GeneratorHandle, ReadComponentsTool,
    StrReplaceEditorTool, SubmoduleGenerator,
};

use codewiki_core::ComponentMap;
use std::path::Path;
use std::sync::Arc;

/// Registry for a simple module: component reading plus the editor.
pub fn create_doc_registry(
    components: Arc<ComponentMap>,
    docs_dir: impl AsRef<Path>,
    repo_dir: impl AsRef<Path>,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(ReadComponentsTool::new(components));
    registry.register(StrReplaceEditorTool::new(docs_dir, repo_dir));
    registry
}

/// Registry for a complex module: everything above plus recursive
/// sub-module generation.
pub fn create_complex_registry(
    components: Arc<ComponentMap>,
    docs_dir: impl AsRef<Path>,
    repo_dir: impl AsRef<Path>,
    generator: GeneratorHandle,
) -> ToolRegistry {
    let mut registry = create_doc_registry(components, docs_dir, repo_dir);
    registry.register(GenerateSubmodulesTool::new(generator));
    registry
}

//! Prompt composition for module documentation

use codewiki_core::{ComponentMap, Module, ModuleTree};
use indexmap::IndexMap;
use serde_json::json;

/// Names and descriptions of the whole tree, indented for orientation.
pub fn tree_outline(tree: &ModuleTree) -> String {
    let mut out = String::new();
    tree.for_each(|path, module| {
        let indent = "  ".repeat(path.len().saturating_sub(1));
        let name = path.last().map(String::as_str).unwrap_or_default();
        if module.description.is_empty() {
            out.push_str(&format!("{indent}- {name}\n"));
        } else {
            out.push_str(&format!("{indent}- {name}: {}\n", module.description));
        }
    });
    out
}

/// Shared system prompt: module header, global tree, output expectations.
pub fn system_prompt(
    path: &[String],
    module: &Module,
    tree: &ModuleTree,
    custom_instructions: Option<&str>,
    tool_notes: &str,
) -> String {
    let name = path.last().map(String::as_str).unwrap_or("repository");
    let mut prompt = format!(
        "You are writing developer documentation for the module \"{name}\" \
         (tree path: {path}).\n",
        path = path.join(" / "),
    );
    if !module.description.is_empty() {
        prompt.push_str(&format!("Module responsibility: {}\n", module.description));
    }
    prompt.push_str(&format!(
        "\nThe full module tree of this repository, for orientation:\n{}\n",
        tree_outline(tree)
    ));
    prompt.push_str(
        "Write clear Markdown. Use Mermaid diagrams where they clarify \
         structure or flow. Cross-reference sibling modules by their relative \
         markdown paths when helpful.\n",
    );
    if !tool_notes.is_empty() {
        prompt.push_str(&format!("\n{tool_notes}\n"));
    }
    if let Some(extra) = custom_instructions {
        if !extra.is_empty() {
            prompt.push_str(&format!("\n{extra}\n"));
        }
    }
    prompt
}

/// User task for the tool-enabled agent documenting a leaf module.
pub fn leaf_task(name: &str, module: &Module, doc_file: &str) -> String {
    format!(
        "Document the module \"{name}\". It owns these components:\n{}\n\
         Read their sources with read_code_components, then create the \
         finished document at \"{doc_file}\" using str_replace_editor with \
         op=create. The document should cover purpose, key types and \
         functions, and how the pieces interact.",
        module
            .components
            .iter()
            .map(|id| format!("- {id}"))
            .collect::<Vec<_>>()
            .join("\n"),
    )
}

/// User task for the tool-enabled agent synthesizing a parent or the
/// repository overview.
pub fn parent_task(name: &str, payload: &serde_json::Value, doc_file: &str) -> String {
    format!(
        "Write a synthesizing document for \"{name}\": an architecture \
         overview of its children, how they interact, and Mermaid diagrams \
         where useful. The module tree below tags the target with \
         \"is_target\" and inlines the finished documentation of its direct \
         children:\n\n{payload}\n\n\
         Create the finished document at \"{doc_file}\" using \
         str_replace_editor with op=create.",
        payload = serde_json::to_string_pretty(payload).unwrap_or_default(),
    )
}

/// One-shot prompt for subprocess mode: the API-mode prompt plus every
/// component source, closed by a strict raw-markdown footer.
pub fn subprocess_leaf_prompt(
    system: &str,
    name: &str,
    module: &Module,
    components: &ComponentMap,
) -> String {
    let mut sources = String::new();
    for id in &module.components {
        if let Some(component) = components.get(id) {
            sources.push_str(&format!(
                "=== {} ({}:{}-{}) ===\n{}\n\n",
                component.id,
                component.file_path,
                component.start_line,
                component.end_line,
                component.source_code
            ));
        }
    }
    format!(
        "{system}\nDocument the module \"{name}\". Its complete source \
         follows.\n\n{sources}\
         Respond with the raw Markdown document only: no code fences around \
         the whole answer, no preamble, no closing remarks."
    )
}

/// One-shot prompt for a parent/overview document in subprocess mode.
pub fn subprocess_parent_prompt(system: &str, name: &str, payload: &serde_json::Value) -> String {
    format!(
        "{system}\nWrite a synthesizing document for \"{name}\": an \
         architecture overview of its children, their interactions, and \
         Mermaid diagrams where useful. The module tree below tags the \
         target with \"is_target\" and inlines the finished documentation of \
         its direct children.\n\n{payload}\n\n\
         Wrap the finished Markdown in <OVERVIEW> and </OVERVIEW> tags and \
         output nothing else.",
        payload = serde_json::to_string_pretty(payload).unwrap_or_default(),
    )
}

/// Contextual payload for a parent module: a recursive copy of the tree in
/// which only the target's direct children carry their generated markdown;
/// every other module is reduced to name, description and component count.
///
/// `target` empty means the virtual root (repository overview); its direct
/// children are the root modules.
pub fn contextual_payload(
    tree: &ModuleTree,
    target: &[String],
    child_docs: &IndexMap<String, String>,
) -> serde_json::Value {
    fn render(
        name: &str,
        module: &Module,
        path: &mut Vec<String>,
        target: &[String],
        child_docs: &IndexMap<String, String>,
    ) -> serde_json::Value {
        path.push(name.to_string());
        let is_target = path.as_slice() == target;
        let is_direct_child =
            path.len() == target.len() + 1 && path.starts_with(target);

        let mut children = serde_json::Map::new();
        for (child_name, child) in &module.children {
            children.insert(
                child_name.clone(),
                render(child_name, child, path, target, child_docs),
            );
        }

        let mut entry = json!({
            "description": module.description,
            "component_count": module.components.len(),
            "children": serde_json::Value::Object(children),
        });
        if is_target {
            entry["is_target"] = json!(true);
        }
        if is_direct_child {
            if let Some(markdown) = child_docs.get(name) {
                entry["markdown"] = json!(markdown);
            }
        }
        path.pop();
        entry
    }

    let mut out = serde_json::Map::new();
    let mut path = Vec::new();
    for (name, module) in &tree.0 {
        out.insert(
            name.clone(),
            render(name, module, &mut path, target, child_docs),
        );
    }
    serde_json::Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use codewiki_core::Module;

    fn tree() -> ModuleTree {
        let mut children = IndexMap::new();
        children.insert("lexer".to_string(), Module::leaf("tokens", vec!["l".into()]));
        children.insert("parser".to_string(), Module::leaf("ast", vec!["p".into()]));
        let mut roots = IndexMap::new();
        roots.insert("frontend".to_string(), Module::parent("front half", children));
        roots.insert("backend".to_string(), Module::leaf("back half", vec!["b".into()]));
        ModuleTree(roots)
    }

    #[test]
    fn outline_indents_by_depth() {
        let outline = tree_outline(&tree());
        assert!(outline.contains("- frontend: front half"));
        assert!(outline.contains("  - lexer: tokens"));
        assert!(outline.contains("- backend: back half"));
    }

    #[test]
    fn payload_tags_target_and_inlines_direct_children_only() {
        let mut docs = IndexMap::new();
        docs.insert("lexer".to_string(), "# Lexer\n".to_string());
        docs.insert("parser".to_string(), "# Parser\n".to_string());
        let payload = contextual_payload(&tree(), &["frontend".to_string()], &docs);

        assert_eq!(payload["frontend"]["is_target"], true);
        assert_eq!(payload["frontend"]["children"]["lexer"]["markdown"], "# Lexer\n");
        assert_eq!(payload["frontend"]["children"]["parser"]["markdown"], "# Parser\n");
        // The sibling is summarized, not inlined.
        assert!(payload["backend"].get("markdown").is_none());
        assert!(payload["backend"].get("is_target").is_none());
        assert_eq!(payload["backend"]["component_count"], 1);
    }

    #[test]
    fn root_payload_inlines_root_modules() {
        let mut docs = IndexMap::new();
        docs.insert("backend".to_string(), "# Backend\n".to_string());
        let payload = contextual_payload(&tree(), &[], &docs);
        assert_eq!(payload["backend"]["markdown"], "# Backend\n");
        assert!(payload["frontend"]["children"]["lexer"].get("markdown").is_none());
    }

    #[test]
    fn system_prompt_carries_custom_instructions() {
        let tree = tree();
        let module = tree.get(&["backend".to_string()]).unwrap();
        let prompt = system_prompt(
            &["backend".to_string()],
            module,
            &tree,
            Some("Answer in French."),
            "",
        );
        assert!(prompt.contains("backend"));
        assert!(prompt.contains("Mermaid"));
        assert!(prompt.ends_with("Answer in French.\n"));
    }
}

//! str_replace_editor — the agent's file surface
//!
//! Writes are confined to the docs directory; `view` may additionally read
//! anywhere under the repository root. Every refusal is a plain-text error
//! result so the agent can adapt instead of dying.

use crate::registry::{DocTool, ToolResult};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::{Component as PathComponent, Path, PathBuf};
use std::sync::Mutex;
use tokio::fs;
use tracing::debug;
use walkdir::WalkDir;

pub struct StrReplaceEditorTool {
    docs_dir: PathBuf,
    repo_dir: PathBuf,
    /// Pre-edit snapshots per file; `None` marks "did not exist".
    history: Mutex<HashMap<PathBuf, Vec<Option<String>>>>,
}

impl StrReplaceEditorTool {
    pub fn new(docs_dir: impl AsRef<Path>, repo_dir: impl AsRef<Path>) -> Self {
        Self {
            docs_dir: absolutize(docs_dir.as_ref()),
            repo_dir: absolutize(repo_dir.as_ref()),
            history: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve to an absolute, lexically normalized path rooted in docs_dir
    /// for relative inputs.
    fn resolve(&self, raw: &str) -> Result<PathBuf, String> {
        let path = Path::new(raw);
        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.docs_dir.join(path)
        };
        normalize(&joined).ok_or_else(|| format!("invalid path: {raw}"))
    }

    fn resolve_write(&self, raw: &str) -> Result<PathBuf, String> {
        let path = self.resolve(raw)?;
        if !path.starts_with(&self.docs_dir) {
            return Err(format!(
                "write refused: {} is outside the docs directory",
                path.display()
            ));
        }
        Ok(path)
    }

    fn resolve_read(&self, raw: &str) -> Result<PathBuf, String> {
        let path = self.resolve(raw)?;
        if path.starts_with(&self.docs_dir) || path.starts_with(&self.repo_dir) {
            Ok(path)
        } else {
            Err(format!(
                "read refused: {} is outside the docs and repository directories",
                path.display()
            ))
        }
    }

    fn remember(&self, path: &Path, before: Option<String>) {
        if let Ok(mut history) = self.history.lock() {
            history.entry(path.to_path_buf()).or_default().push(before);
        }
    }

    async fn op_view(&self, path: &str) -> ToolResult {
        let resolved = match self.resolve_read(path) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };
        match fs::metadata(&resolved).await {
            Ok(meta) if meta.is_dir() => ToolResult::text(list_directory(&resolved)),
            Ok(_) => match fs::read_to_string(&resolved).await {
                Ok(content) => ToolResult::text(number_lines(&content)),
                Err(e) => ToolResult::error(format!("failed to read {path}: {e}")),
            },
            Err(e) => ToolResult::error(format!("cannot view {path}: {e}")),
        }
    }

    async fn op_create(&self, path: &str, file_text: &str) -> ToolResult {
        let resolved = match self.resolve_write(path) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };
        let before = fs::read_to_string(&resolved).await.ok();
        if let Some(parent) = resolved.parent() {
            if let Err(e) = fs::create_dir_all(parent).await {
                return ToolResult::error(format!("failed to create parent dirs: {e}"));
            }
        }
        match fs::write(&resolved, file_text).await {
            Ok(()) => {
                self.remember(&resolved, before);
                debug!(path = %resolved.display(), bytes = file_text.len(), "editor create");
                ToolResult::text(format!("Created {path}"))
            }
            Err(e) => ToolResult::error(format!("failed to write {path}: {e}")),
        }
    }

    async fn op_str_replace(&self, path: &str, old_str: &str, new_str: &str) -> ToolResult {
        let resolved = match self.resolve_write(path) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };
        let content = match fs::read_to_string(&resolved).await {
            Ok(c) => c,
            Err(e) => return ToolResult::error(format!("failed to read {path}: {e}")),
        };
        let count = content.matches(old_str).count();
        if count == 0 {
            return ToolResult::error("old_str not found in file");
        }
        if count > 1 {
            return ToolResult::error(format!(
                "old_str found {count} times — provide more surrounding context to make it unique"
            ));
        }
        let updated = content.replacen(old_str, new_str, 1);
        match fs::write(&resolved, &updated).await {
            Ok(()) => {
                self.remember(&resolved, Some(content));
                ToolResult::text(format!("Edited {path}"))
            }
            Err(e) => ToolResult::error(format!("failed to write {path}: {e}")),
        }
    }

    async fn op_insert(&self, path: &str, insert_line: usize, new_str: &str) -> ToolResult {
        let resolved = match self.resolve_write(path) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };
        let content = match fs::read_to_string(&resolved).await {
            Ok(c) => c,
            Err(e) => return ToolResult::error(format!("failed to read {path}: {e}")),
        };
        let mut lines: Vec<&str> = content.lines().collect();
        let at = insert_line.min(lines.len());
        lines.insert(at, new_str);
        let mut updated = lines.join("\n");
        if content.ends_with('\n') {
            updated.push('\n');
        }
        match fs::write(&resolved, &updated).await {
            Ok(()) => {
                self.remember(&resolved, Some(content));
                ToolResult::text(format!("Inserted after line {at} in {path}"))
            }
            Err(e) => ToolResult::error(format!("failed to write {path}: {e}")),
        }
    }

    async fn op_undo(&self, path: &str) -> ToolResult {
        let resolved = match self.resolve_write(path) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };
        let snapshot = match self.history.lock() {
            Ok(mut history) => history.get_mut(&resolved).and_then(Vec::pop),
            Err(_) => None,
        };
        match snapshot {
            Some(Some(previous)) => match fs::write(&resolved, previous).await {
                Ok(()) => ToolResult::text(format!("Reverted last edit of {path}")),
                Err(e) => ToolResult::error(format!("failed to restore {path}: {e}")),
            },
            Some(None) => match fs::remove_file(&resolved).await {
                Ok(()) => ToolResult::text(format!("Removed {path} (undo of create)")),
                Err(e) => ToolResult::error(format!("failed to remove {path}: {e}")),
            },
            None => ToolResult::error("no edit history for this file"),
        }
    }
}

#[async_trait::async_trait]
impl DocTool for StrReplaceEditorTool {
    fn name(&self) -> &str {
        "str_replace_editor"
    }

    fn description(&self) -> &str {
        "View, create and edit files. Writes are restricted to the docs \
         directory; view can also read repository sources. op is one of \
         view, create, str_replace, insert, undo_edit."
    }

    fn prompt(&self) -> &str {
        "Write the module's markdown with str_replace_editor op=create. \
         Relative paths resolve inside the docs directory."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "op": {
                    "type": "string",
                    "enum": ["view", "create", "str_replace", "insert", "undo_edit"],
                    "description": "The operation to run"
                },
                "path": {
                    "type": "string",
                    "description": "Target path; relative paths are rooted in the docs directory"
                },
                "file_text": {
                    "type": "string",
                    "description": "Full file content for create"
                },
                "old_str": {
                    "type": "string",
                    "description": "Exact text to replace (must be unique in the file)"
                },
                "new_str": {
                    "type": "string",
                    "description": "Replacement or inserted text"
                },
                "insert_line": {
                    "type": "integer",
                    "description": "Line number to insert after (0 = top of file)"
                }
            },
            "required": ["op", "path"]
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let op = match args.get("op").and_then(|v| v.as_str()) {
            Some(op) => op,
            None => return ToolResult::error("Missing required parameter: op"),
        };
        let path = match args.get("path").and_then(|v| v.as_str()) {
            Some(p) => p,
            None => return ToolResult::error("Missing required parameter: path"),
        };

        match op {
            "view" => self.op_view(path).await,
            "create" => match args.get("file_text").and_then(|v| v.as_str()) {
                Some(text) => self.op_create(path, text).await,
                None => ToolResult::error("create requires file_text"),
            },
            "str_replace" => {
                let Some(old_str) = args.get("old_str").and_then(|v| v.as_str()) else {
                    return ToolResult::error("str_replace requires old_str");
                };
                let new_str = args.get("new_str").and_then(|v| v.as_str()).unwrap_or("");
                self.op_str_replace(path, old_str, new_str).await
            }
            "insert" => {
                let Some(line) = args.get("insert_line").and_then(|v| v.as_u64()) else {
                    return ToolResult::error("insert requires insert_line");
                };
                let new_str = args.get("new_str").and_then(|v| v.as_str()).unwrap_or("");
                self.op_insert(path, line as usize, new_str).await
            }
            "undo_edit" => self.op_undo(path).await,
            other => ToolResult::error(format!("unknown op: {other}")),
        }
    }
}

/// Best-effort absolute form without requiring the path to exist.
fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        normalize(path).unwrap_or_else(|| path.to_path_buf())
    } else {
        let joined = std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf());
        normalize(&joined).unwrap_or(joined)
    }
}

/// Lexical normalization: strips `.`, folds `..`. Returns None when `..`
/// would climb above the root.
fn normalize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            PathComponent::CurDir => {}
            PathComponent::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            other => out.push(other),
        }
    }
    Some(out)
}

fn number_lines(content: &str) -> String {
    content
        .lines()
        .enumerate()
        .map(|(i, line)| format!("{:>6}\t{}", i + 1, line))
        .collect::<Vec<_>>()
        .join("\n")
}

fn list_directory(dir: &Path) -> String {
    let mut entries = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(2)
        .sort_by_file_name()
        .into_iter()
        .flatten()
    {
        let suffix = if entry.file_type().is_dir() { "/" } else { "" };
        if let Ok(rel) = entry.path().strip_prefix(dir) {
            entries.push(format!("{}{}", rel.display(), suffix));
        }
    }
    if entries.is_empty() {
        "(empty directory)".to_string()
    } else {
        entries.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn editor() -> (TempDir, TempDir, StrReplaceEditorTool) {
        let docs = TempDir::new().unwrap();
        let repo = TempDir::new().unwrap();
        let tool = StrReplaceEditorTool::new(docs.path(), repo.path());
        (docs, repo, tool)
    }

    #[tokio::test]
    async fn create_then_view() {
        let (docs, _repo, tool) = editor();
        let result = tool
            .execute(json!({"op": "create", "path": "gateway.md", "file_text": "# Gateway\n"}))
            .await;
        assert!(!result.is_error(), "{result:?}");
        assert!(docs.path().join("gateway.md").exists());

        let view = tool
            .execute(json!({"op": "view", "path": "gateway.md"}))
            .await;
        assert!(view.to_content_string().contains("# Gateway"));
    }

    #[tokio::test]
    async fn write_outside_docs_dir_is_refused() {
        let (_docs, _repo, tool) = editor();
        for path in ["../escape.md", "/tmp/escape.md", "a/../../escape.md"] {
            let result = tool
                .execute(json!({"op": "create", "path": path, "file_text": "x"}))
                .await;
            assert!(result.is_error(), "expected refusal for {path}");
            assert!(result.to_content_string().contains("refused")
                || result.to_content_string().contains("invalid path"));
        }
    }

    #[tokio::test]
    async fn view_reaches_into_the_repository() {
        let (_docs, repo, tool) = editor();
        std::fs::write(repo.path().join("lib.rs"), "pub fn x() {}\n").unwrap();
        let path = repo.path().join("lib.rs");
        let view = tool
            .execute(json!({"op": "view", "path": path.to_str().unwrap()}))
            .await;
        assert!(view.to_content_string().contains("pub fn x()"));
    }

    #[tokio::test]
    async fn str_replace_requires_unique_match() {
        let (_docs, _repo, tool) = editor();
        tool.execute(json!({"op": "create", "path": "m.md", "file_text": "aa aa"}))
            .await;
        let result = tool
            .execute(json!({"op": "str_replace", "path": "m.md", "old_str": "aa", "new_str": "b"}))
            .await;
        assert!(result.is_error());
        assert!(result.to_content_string().contains("2 times"));
    }

    #[tokio::test]
    async fn insert_and_undo() {
        let (docs, _repo, tool) = editor();
        tool.execute(json!({"op": "create", "path": "m.md", "file_text": "one\nthree\n"}))
            .await;
        tool.execute(json!({"op": "insert", "path": "m.md", "insert_line": 1, "new_str": "two"}))
            .await;
        let content = std::fs::read_to_string(docs.path().join("m.md")).unwrap();
        assert_eq!(content, "one\ntwo\nthree\n");

        tool.execute(json!({"op": "undo_edit", "path": "m.md"})).await;
        let content = std::fs::read_to_string(docs.path().join("m.md")).unwrap();
        assert_eq!(content, "one\nthree\n");
    }

    #[tokio::test]
    async fn undo_of_create_removes_the_file() {
        let (docs, _repo, tool) = editor();
        tool.execute(json!({"op": "create", "path": "fresh.md", "file_text": "x"}))
            .await;
        tool.execute(json!({"op": "undo_edit", "path": "fresh.md"})).await;
        assert!(!docs.path().join("fresh.md").exists());
    }

    #[tokio::test]
    async fn directory_view_lists_entries() {
        let (docs, _repo, tool) = editor();
        std::fs::write(docs.path().join("a.md"), "x").unwrap();
        std::fs::create_dir(docs.path().join("sub")).unwrap();
        let path = docs.path().to_str().unwrap();
        let view = tool.execute(json!({"op": "view", "path": path})).await;
        let text = view.to_content_string();
        assert!(text.contains("a.md"));
        assert!(text.contains("sub/"));
    }
}

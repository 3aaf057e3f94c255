//! On-disk module tree store
//!
//! Everything under docs_dir goes through temp+fsync+rename so a crash at
//! any point leaves either the previous file or the new one, never a torn
//! write.

use codewiki_core::{Error, ModuleTree, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

pub const TREE_FILE: &str = "module_tree.json";
pub const FIRST_TREE_FILE: &str = "first_module_tree.json";
pub const METADATA_FILE: &str = "metadata.json";
pub const OVERVIEW_FILE: &str = "overview.md";

/// Generation metadata, rewritten at the end of every run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Metadata {
    pub generated_at: String,
    pub commit_id: String,
    pub main_model: String,
    pub fallback_models: Vec<String>,
    /// Backends that actually served requests this run.
    pub models_used: Vec<String>,
    pub counts: MetadataCounts,
    pub files: Vec<String>,
    pub errors: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MetadataCounts {
    pub components: usize,
    pub leaf_nodes: usize,
    pub modules: usize,
    pub max_depth: u32,
}

#[derive(Clone)]
pub struct TreeStore {
    docs_dir: PathBuf,
}

impl TreeStore {
    pub fn new(docs_dir: impl Into<PathBuf>) -> Self {
        Self {
            docs_dir: docs_dir.into(),
        }
    }

    pub fn docs_dir(&self) -> &Path {
        &self.docs_dir
    }

    pub async fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.docs_dir)
            .await
            .map_err(|e| Error::filesystem(&self.docs_dir, e))
    }

    fn path_of(&self, file: &str) -> PathBuf {
        self.docs_dir.join(file)
    }

    /// Resume rule: a live tree on disk wins over re-clustering.
    pub async fn load_tree(&self) -> Result<Option<ModuleTree>> {
        let path = self.path_of(TREE_FILE);
        match fs::read_to_string(&path).await {
            Ok(text) => {
                let mut tree: ModuleTree = serde_json::from_str(&text)?;
                tree.assign_doc_files();
                info!(path = %path.display(), "resuming from persisted module tree");
                Ok(Some(tree))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::filesystem(path, e)),
        }
    }

    pub async fn save_tree(&self, tree: &ModuleTree) -> Result<()> {
        let json = serde_json::to_string_pretty(tree)?;
        self.write_atomic(TREE_FILE, json.as_bytes()).await
    }

    /// The initial clustering snapshot is written once and never mutated.
    pub async fn save_first_tree(&self, tree: &ModuleTree) -> Result<()> {
        let path = self.path_of(FIRST_TREE_FILE);
        if fs::try_exists(&path)
            .await
            .map_err(|e| Error::filesystem(&path, e))?
        {
            return Ok(());
        }
        let json = serde_json::to_string_pretty(tree)?;
        self.write_atomic(FIRST_TREE_FILE, json.as_bytes()).await
    }

    pub async fn write_markdown(&self, file: &str, content: &str) -> Result<()> {
        self.write_atomic(file, content.as_bytes()).await
    }

    pub async fn write_metadata(&self, metadata: &Metadata) -> Result<()> {
        let json = serde_json::to_string_pretty(metadata)?;
        self.write_atomic(METADATA_FILE, json.as_bytes()).await
    }

    /// Skip-rule check: the artifact exists and has content.
    pub async fn doc_exists_nonempty(&self, file: &str) -> bool {
        if file.is_empty() {
            return false;
        }
        match fs::metadata(self.path_of(file)).await {
            Ok(meta) => meta.is_file() && meta.len() > 0,
            Err(_) => false,
        }
    }

    /// Degenerate single-module case: promote the only module file to the
    /// overview name.
    pub async fn rename_markdown(&self, from: &str, to: &str) -> Result<()> {
        let source = self.path_of(from);
        let target = self.path_of(to);
        fs::rename(&source, &target)
            .await
            .map_err(|e| Error::filesystem(source, e))
    }

    async fn write_atomic(&self, file: &str, bytes: &[u8]) -> Result<()> {
        let target = self.path_of(file);
        let tmp = self.path_of(&format!(".{file}.tmp"));
        let result: std::io::Result<()> = async {
            let mut handle = fs::File::create(&tmp).await?;
            handle.write_all(bytes).await?;
            handle.sync_all().await?;
            drop(handle);
            fs::rename(&tmp, &target).await
        }
        .await;
        match result {
            Ok(()) => {
                debug!(path = %target.display(), bytes = bytes.len(), "persisted");
                Ok(())
            }
            Err(e) => {
                let _ = fs::remove_file(&tmp).await;
                Err(Error::filesystem(target, e))
            }
        }
    }
}

/// Best-effort commit id from `.git/HEAD`, without invoking git.
pub async fn read_commit_id(repo_dir: &Path) -> String {
    let head = repo_dir.join(".git").join("HEAD");
    let Ok(content) = fs::read_to_string(&head).await else {
        return String::new();
    };
    let content = content.trim();
    if let Some(reference) = content.strip_prefix("ref: ") {
        let target = repo_dir.join(".git").join(reference.trim());
        match fs::read_to_string(&target).await {
            Ok(id) => id.trim().to_string(),
            Err(_) => String::new(),
        }
    } else {
        content.to_string()
    }
}

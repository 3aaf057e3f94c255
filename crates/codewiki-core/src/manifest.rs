//! Parsed-repository manifest — the hand-off file from the parser
//!
//! The parser (out of scope here) emits a JSON manifest with every extracted
//! component plus the subset of ids considered documentable. Loading fills in
//! missing token estimates and cross-checks the leaf ids.

use crate::component::{Component, ComponentMap, LeafSet};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct RepoManifest {
    #[serde(default)]
    pub repo_name: String,
    pub components: Vec<Component>,
    pub leaf_ids: Vec<String>,
}

impl RepoManifest {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Split into the engine's inputs, validating referential integrity.
    pub fn into_inputs(self) -> Result<(ComponentMap, LeafSet)> {
        let mut components = ComponentMap::with_capacity(self.components.len());
        for component in self.components {
            if component.id.is_empty() {
                return Err(Error::config("manifest contains a component without id"));
            }
            if components.insert(component.id.clone(), component).is_some() {
                return Err(Error::config("manifest contains duplicate component ids"));
            }
        }

        let mut leaves = LeafSet::new();
        for id in self.leaf_ids {
            if !components.contains_key(&id) {
                return Err(Error::config(format!("leaf id '{id}' has no component")));
            }
            leaves.insert(id);
        }
        Ok((components, leaves))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"{
        "repo_name": "demo",
        "components": [
            {"id": "a.rs::alpha", "kind": "function", "file_path": "a.rs",
             "start_line": 1, "end_line": 4, "source_code": "fn alpha() {}"},
            {"id": "b.rs::Beta", "kind": "struct", "file_path": "b.rs",
             "token_estimate": 42}
        ],
        "leaf_ids": ["a.rs::alpha", "b.rs::Beta"]
    }"#;

    #[test]
    fn loads_and_splits() {
        let manifest = RepoManifest::from_json(MANIFEST).unwrap();
        let (components, leaves) = manifest.into_inputs().unwrap();
        assert_eq!(components.len(), 2);
        assert_eq!(leaves.len(), 2);
        // Missing estimate computed from source, explicit one kept.
        assert!(components["a.rs::alpha"].tokens() > 0);
        assert_eq!(components["b.rs::Beta"].tokens(), 42);
    }

    #[test]
    fn unknown_leaf_id_is_rejected() {
        let manifest = RepoManifest {
            repo_name: String::new(),
            components: vec![],
            leaf_ids: vec!["ghost".into()],
        };
        assert!(manifest.into_inputs().is_err());
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let text = r#"{"components": [
            {"id": "x", "file_path": "x.rs"},
            {"id": "x", "file_path": "y.rs"}
        ], "leaf_ids": []}"#;
        let manifest = RepoManifest::from_json(text).unwrap();
        assert!(manifest.into_inputs().is_err());
    }
}

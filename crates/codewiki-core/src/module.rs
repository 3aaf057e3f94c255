//! Module tree — the hierarchical output skeleton of a documentation run
//!
//! The tree is created once by clustering, then mutated only through status
//! and doc-path updates as generation progresses. Child order is part of the
//! persisted contract, so children live in an `IndexMap`.

use crate::component::ComponentMap;
use crate::sanitize::sanitize;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Generation state of one module.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DocStatus {
    #[default]
    Absent,
    InProgress,
    Done,
    Failed,
}

impl std::fmt::Display for DocStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Absent => write!(f, "absent"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Done => write!(f, "done"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// One node of the module tree. The module's name is its key in the parent
/// map; leaf modules own components, parent modules own children.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Module {
    pub description: String,
    pub components: Vec<String>,
    pub doc_status: DocStatus,
    pub doc_path: String,
    pub children: IndexMap<String, Module>,
    /// File basename assigned at materialization. Recomputed after load, so
    /// it is not persisted.
    #[serde(skip)]
    pub doc_file: String,
}

impl Module {
    pub fn leaf(description: impl Into<String>, components: Vec<String>) -> Self {
        Self {
            description: description.into(),
            components,
            ..Self::default()
        }
    }

    pub fn parent(description: impl Into<String>, children: IndexMap<String, Module>) -> Self {
        Self {
            description: description.into(),
            children,
            ..Self::default()
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Recursive nesting depth below this module (0 for a leaf).
    pub fn depth(&self) -> u32 {
        self.children
            .values()
            .map(|c| c.depth() + 1)
            .max()
            .unwrap_or(0)
    }
}

/// Path of module names from a root entry down to a module.
pub type ModulePath = Vec<String>;

/// Ordered mapping of root module name → module.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct ModuleTree(pub IndexMap<String, Module>);

impl ModuleTree {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, path: &[String]) -> Option<&Module> {
        let (first, rest) = path.split_first()?;
        let mut module = self.0.get(first)?;
        for name in rest {
            module = module.children.get(name)?;
        }
        Some(module)
    }

    pub fn get_mut(&mut self, path: &[String]) -> Option<&mut Module> {
        let (first, rest) = path.split_first()?;
        let mut module = self.0.get_mut(first)?;
        for name in rest {
            module = module.children.get_mut(name)?;
        }
        Some(module)
    }

    /// Visit every module depth-first in stable order.
    pub fn for_each(&self, mut visit: impl FnMut(&[String], &Module)) {
        fn walk(
            path: &mut ModulePath,
            module: &Module,
            visit: &mut impl FnMut(&[String], &Module),
        ) {
            visit(path, module);
            for (name, child) in &module.children {
                path.push(name.clone());
                walk(path, child, visit);
                path.pop();
            }
        }
        let mut path = ModulePath::new();
        for (name, module) in &self.0 {
            path.push(name.clone());
            walk(&mut path, module, &mut visit);
            path.pop();
        }
    }

    /// Paths of all leaf modules, depth-first.
    pub fn leaf_paths(&self) -> Vec<ModulePath> {
        let mut out = Vec::new();
        self.for_each(|path, module| {
            if module.is_leaf() {
                out.push(path.to_vec());
            }
        });
        out
    }

    /// Paths of all parent modules, children before parents.
    pub fn parent_paths_postorder(&self) -> Vec<ModulePath> {
        let mut preorder = Vec::new();
        self.for_each(|path, module| {
            if !module.is_leaf() {
                preorder.push(path.to_vec());
            }
        });
        // Depth-first preorder visits a parent before its descendants, so the
        // reverse by depth keeps children ahead of their ancestors.
        preorder.sort_by_key(|p| std::cmp::Reverse(p.len()));
        preorder
    }

    pub fn module_count(&self) -> usize {
        let mut n = 0;
        self.for_each(|_, _| n += 1);
        n
    }

    pub fn leaf_count(&self) -> usize {
        self.leaf_paths().len()
    }

    /// Nesting depth of the deepest module; root entries are depth 1.
    pub fn depth(&self) -> u32 {
        self.0.values().map(|m| m.depth() + 1).max().unwrap_or(0)
    }

    /// Every component id mentioned anywhere in the tree, in visit order.
    pub fn component_ids(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.for_each(|_, module| out.extend(module.components.iter().cloned()));
        out
    }

    /// Assign a unique `.md` basename to every module. Deterministic over the
    /// tree's stable visit order; name collisions get `-2`, `-3`, … suffixes.
    pub fn assign_doc_files(&mut self) {
        let mut taken: HashMap<String, u32> = HashMap::new();
        fn walk(module: &mut Module, name: &str, taken: &mut HashMap<String, u32>) {
            let base = sanitize(name);
            let n = taken.entry(base.clone()).or_insert(0);
            *n += 1;
            module.doc_file = if *n == 1 {
                format!("{base}.md")
            } else {
                format!("{base}-{n}.md")
            };
            for (child_name, child) in module.children.iter_mut() {
                let child_name = child_name.clone();
                walk(child, &child_name, taken);
            }
        }
        let names: Vec<String> = self.0.keys().cloned().collect();
        for name in names {
            if let Some(module) = self.0.get_mut(&name) {
                walk(module, &name, &mut taken);
            }
        }
    }

    /// Invariant sweep used by tests and end-of-run sanity checks. Returns a
    /// human-readable violation per breach; empty means the tree is sound.
    pub fn violations(&self, components: &ComponentMap, max_depth: u32) -> Vec<String> {
        let mut out = Vec::new();

        let mut seen: HashMap<String, String> = HashMap::new();
        self.for_each(|path, module| {
            let here = path.join("/");
            let name = path.last().map(String::as_str).unwrap_or_default();
            if name.is_empty() || name.contains('/') || name.contains('\\') || name.contains('\0')
            {
                out.push(format!("invalid module name at {here:?}"));
            }
            for id in &module.components {
                if !components.contains_key(id) {
                    out.push(format!("{here}: unknown component {id}"));
                }
                if let Some(prev) = seen.insert(id.clone(), here.clone()) {
                    out.push(format!("component {id} owned by both {prev} and {here}"));
                }
            }
            if module.doc_status == DocStatus::Done {
                if module.doc_path.is_empty() {
                    out.push(format!("{here}: done without doc_path"));
                }
                for (child_name, child) in &module.children {
                    if child.doc_status != DocStatus::Done {
                        out.push(format!("{here}: done but child {child_name} is not"));
                    }
                }
            } else if !module.doc_path.is_empty() {
                out.push(format!("{here}: doc_path set while {}", module.doc_status));
            }
            if !module.is_leaf() && !module.components.is_empty() {
                out.push(format!("{here}: parent module owns components directly"));
            }
        });

        if max_depth > 0 && self.depth() > max_depth {
            out.push(format!(
                "tree depth {} exceeds configured maximum {max_depth}",
                self.depth()
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ModuleTree {
        let mut children = IndexMap::new();
        children.insert("parser".to_string(), Module::leaf("parsing", vec!["a".into()]));
        children.insert("codec".to_string(), Module::leaf("encoding", vec!["b".into()]));
        let mut roots = IndexMap::new();
        roots.insert("wire".to_string(), Module::parent("wire layer", children));
        ModuleTree(roots)
    }

    #[test]
    fn walk_order_is_depth_first() {
        let tree = sample();
        let mut names = Vec::new();
        tree.for_each(|path, _| names.push(path.join("/")));
        assert_eq!(names, vec!["wire", "wire/parser", "wire/codec"]);
    }

    #[test]
    fn leaf_and_parent_paths() {
        let tree = sample();
        assert_eq!(tree.leaf_paths().len(), 2);
        let parents = tree.parent_paths_postorder();
        assert_eq!(parents, vec![vec!["wire".to_string()]]);
    }

    #[test]
    fn depth_counts_root_as_one() {
        let tree = sample();
        assert_eq!(tree.depth(), 2);
        assert_eq!(ModuleTree::default().depth(), 0);
    }

    #[test]
    fn doc_file_collisions_get_suffixes() {
        let mut roots = IndexMap::new();
        roots.insert("A B".to_string(), Module::leaf("", vec![]));
        roots.insert("a b".to_string(), Module::leaf("", vec![]));
        roots.insert("a_b".to_string(), Module::leaf("", vec![]));
        let mut tree = ModuleTree(roots);
        tree.assign_doc_files();
        let files: Vec<&str> = tree.0.values().map(|m| m.doc_file.as_str()).collect();
        assert_eq!(files, vec!["a_b.md", "a_b-2.md", "a_b-3.md"]);
    }

    #[test]
    fn assign_is_deterministic() {
        let mut a = sample();
        let mut b = sample();
        a.assign_doc_files();
        b.assign_doc_files();
        assert_eq!(a, b);
    }

    #[test]
    fn done_parent_with_pending_child_is_a_violation() {
        let mut tree = sample();
        let path = vec!["wire".to_string()];
        let module = tree.get_mut(&path).unwrap();
        module.doc_status = DocStatus::Done;
        module.doc_path = "wire.md".into();
        let components = ComponentMap::new();
        let violations = tree.violations(&components, 4);
        assert!(violations.iter().any(|v| v.contains("child")));
    }
}

//! Tests for codewiki-core: module tree schema, invariants, sanitize, config

use codewiki_core::*;
use indexmap::IndexMap;
use std::collections::BTreeSet;

fn component(id: &str, file: &str, tokens: u64) -> Component {
    Component {
        id: id.into(),
        kind: ComponentKind::Function,
        file_path: file.into(),
        start_line: 1,
        end_line: 10,
        source_code: format!("fn {}() {{}}", id.replace('.', "_")),
        depends_on: BTreeSet::new(),
        token_estimate: tokens,
    }
}

fn sample_tree() -> ModuleTree {
    let mut children = IndexMap::new();
    children.insert(
        "parsing".to_string(),
        Module::leaf("tokenize and parse", vec!["p.lex".into(), "p.parse".into()]),
    );
    children.insert(
        "eval".to_string(),
        Module::leaf("evaluation", vec!["e.run".into()]),
    );
    let mut roots = IndexMap::new();
    roots.insert(
        "interpreter".to_string(),
        Module::parent("the interpreter", children),
    );
    let mut tree = ModuleTree(roots);
    tree.assign_doc_files();
    tree
}

// ===========================================================================
// DocStatus wire format
// ===========================================================================

#[test]
fn doc_status_wire_strings() {
    let pairs = [
        (DocStatus::Absent, "\"absent\""),
        (DocStatus::InProgress, "\"in_progress\""),
        (DocStatus::Done, "\"done\""),
        (DocStatus::Failed, "\"failed\""),
    ];
    for (status, wire) in pairs {
        assert_eq!(serde_json::to_string(&status).unwrap(), wire);
        let back: DocStatus = serde_json::from_str(wire).unwrap();
        assert_eq!(back, status);
    }
}

// ===========================================================================
// module_tree.json schema
// ===========================================================================

#[test]
fn tree_serializes_to_the_persisted_schema() {
    let tree = sample_tree();
    let value = serde_json::to_value(&tree).unwrap();

    let root = value
        .as_object()
        .and_then(|o| o.get("interpreter"))
        .and_then(|v| v.as_object())
        .expect("root module object");
    for key in ["description", "components", "doc_status", "doc_path", "children"] {
        assert!(root.contains_key(key), "missing schema key {key}");
    }
    assert_eq!(root["doc_status"], "absent");
    assert_eq!(root["doc_path"], "");

    let children = root["children"].as_object().unwrap();
    assert_eq!(children.len(), 2);
    assert_eq!(
        children["parsing"]["components"],
        serde_json::json!(["p.lex", "p.parse"])
    );
}

#[test]
fn load_save_load_is_structurally_equal() {
    let tree = sample_tree();
    let json = serde_json::to_string_pretty(&tree).unwrap();
    let mut loaded: ModuleTree = serde_json::from_str(&json).unwrap();
    loaded.assign_doc_files();
    assert_eq!(loaded, tree);

    let rewritten = serde_json::to_string_pretty(&loaded).unwrap();
    assert_eq!(rewritten, json);
}

#[test]
fn child_order_survives_round_trips() {
    let mut roots = IndexMap::new();
    for name in ["zeta", "alpha", "midway"] {
        roots.insert(name.to_string(), Module::leaf("", vec![]));
    }
    let tree = ModuleTree(roots);
    let json = serde_json::to_string(&tree).unwrap();
    let loaded: ModuleTree = serde_json::from_str(&json).unwrap();
    let order: Vec<&String> = loaded.0.keys().collect();
    assert_eq!(order, ["zeta", "alpha", "midway"]);
}

// ===========================================================================
// Invariants
// ===========================================================================

#[test]
fn partition_violations_are_reported() {
    let mut components = ComponentMap::new();
    for c in [
        component("p.lex", "src/p.rs", 10),
        component("p.parse", "src/p.rs", 10),
        component("e.run", "src/e.rs", 10),
    ] {
        components.insert(c.id.clone(), c);
    }

    let tree = sample_tree();
    assert!(tree.violations(&components, 4).is_empty());

    // Duplicate ownership across two modules.
    let mut broken = tree.clone();
    let path = vec!["interpreter".to_string(), "eval".to_string()];
    broken.get_mut(&path).unwrap().components.push("p.lex".into());
    let violations = broken.violations(&components, 4);
    assert!(violations.iter().any(|v| v.contains("owned by both")));

    // Unknown id.
    let mut broken = tree.clone();
    broken.get_mut(&path).unwrap().components.push("ghost".into());
    assert!(broken
        .violations(&components, 4)
        .iter()
        .any(|v| v.contains("unknown component")));
}

#[test]
fn depth_violation_is_reported() {
    let tree = sample_tree();
    assert_eq!(tree.depth(), 2);
    let violations = tree.violations(&ComponentMap::new(), 1);
    assert!(violations.iter().any(|v| v.contains("depth")));
}

// ===========================================================================
// Sanitize (fixed point, collisions)
// ===========================================================================

#[test]
fn sanitize_is_a_fixed_point() {
    for name in ["Wire Codec", "a/b/c", "__x__", "Δ module", "UPPER-case_ok"] {
        let once = sanitize(name);
        assert_eq!(sanitize(&once), once);
    }
}

#[test]
fn collision_suffixes_are_stable() {
    let mut roots = IndexMap::new();
    roots.insert("IO".to_string(), Module::leaf("", vec![]));
    roots.insert("io".to_string(), Module::leaf("", vec![]));
    let mut tree = ModuleTree(roots);
    tree.assign_doc_files();
    assert_eq!(tree.0["IO"].doc_file, "io.md");
    assert_eq!(tree.0["io"].doc_file, "io-2.md");
}

// ===========================================================================
// Config validation
// ===========================================================================

#[test]
fn config_requires_some_backend() {
    let config = EngineConfig::default();
    let err = config.validate().unwrap_err();
    assert!(matches!(err, Error::ConfigInvalid(_)));
}

#[test]
fn manifest_round_trip_into_inputs() {
    let manifest = RepoManifest {
        repo_name: "demo".into(),
        components: vec![component("a", "src/a.rs", 5)],
        leaf_ids: vec!["a".into()],
    };
    let (components, leaves) = manifest.into_inputs().unwrap();
    assert_eq!(components.len(), 1);
    assert!(leaves.contains("a"));
}

//! Code components — the immutable input of a documentation run

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// What kind of declaration a component is.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    Function,
    Class,
    Method,
    Interface,
    Struct,
    Enum,
    #[default]
    Other,
}

/// A documentable unit of source code, identified by a stable id.
///
/// Components are read-only for the duration of a run. `depends_on` is
/// best-effort and may be incomplete; it is never traversed as ownership.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Component {
    pub id: String,
    #[serde(default)]
    pub kind: ComponentKind,
    pub file_path: String,
    #[serde(default)]
    pub start_line: u32,
    #[serde(default)]
    pub end_line: u32,
    #[serde(default)]
    pub source_code: String,
    #[serde(default)]
    pub depends_on: BTreeSet<String>,
    /// Caller-provided estimate; 0 means "compute from source length".
    #[serde(default)]
    pub token_estimate: u64,
}

impl Component {
    /// Token estimate, falling back to ⌈chars/4⌉ of the source body.
    pub fn tokens(&self) -> u64 {
        if self.token_estimate > 0 {
            self.token_estimate
        } else {
            estimate_tokens(&self.source_code)
        }
    }
}

/// All components of the parsed repository, keyed by id.
pub type ComponentMap = HashMap<String, Component>;

/// Ids designated as documentable. Ordered so iteration is deterministic.
pub type LeafSet = BTreeSet<String>;

/// ⌈chars/4⌉ — the conventional rough token estimate.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}

/// Sum of token estimates over a set of ids. Unknown ids count as zero.
pub fn total_tokens<'a, I>(ids: I, components: &ComponentMap) -> u64
where
    I: IntoIterator<Item = &'a String>,
{
    ids.into_iter()
        .filter_map(|id| components.get(id))
        .map(|c| c.tokens())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("ab"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn explicit_estimate_wins() {
        let c = Component {
            id: "a".into(),
            kind: ComponentKind::Function,
            file_path: "src/a.rs".into(),
            start_line: 1,
            end_line: 2,
            source_code: "fn a() {}".into(),
            depends_on: BTreeSet::new(),
            token_estimate: 100,
        };
        assert_eq!(c.tokens(), 100);
    }

    #[test]
    fn zero_estimate_falls_back_to_source() {
        let c = Component {
            id: "a".into(),
            kind: ComponentKind::Other,
            file_path: "src/a.rs".into(),
            start_line: 0,
            end_line: 0,
            source_code: "abcdefgh".into(),
            depends_on: BTreeSet::new(),
            token_estimate: 0,
        };
        assert_eq!(c.tokens(), 2);
    }
}

//! Token-budget-driven clustering of components into a module tree
//!
//! The LLM acts as a semantic partition oracle; everything it returns is
//! validated against the exact-cover contract and repaired or replaced by a
//! deterministic partition when it misbehaves. Clustering never touches the
//! filesystem.

use crate::output::fence_strip;
use codewiki_core::{
    total_tokens, ComponentMap, EngineConfig, Error, LeafSet, Module, ModuleTree, Result,
};
use codewiki_llm::{GatewayError, LlmGateway, Purpose};
use futures::future::BoxFuture;
use futures::FutureExt;
use indexmap::IndexMap;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const MIN_GROUPS: usize = 2;
const MAX_GROUPS: usize = 12;
const REPAIR_ROUNDS: usize = 2;

#[derive(Debug, Deserialize)]
struct PartitionResponse {
    groups: Vec<PartitionGroup>,
}

#[derive(Debug, Deserialize, Clone)]
struct PartitionGroup {
    name: String,
    #[serde(default)]
    description: String,
    component_ids: Vec<String>,
}

/// Clustering result plus notes about any degradations along the way.
pub struct ClusterOutcome {
    pub tree: ModuleTree,
    pub degraded: Vec<String>,
}

pub struct Clusterer<'a> {
    components: &'a ComponentMap,
    config: &'a EngineConfig,
    gateway: &'a LlmGateway,
    cancel: &'a CancellationToken,
    repo_name: String,
    /// Set once the cascade is exhausted; later nodes collapse to leaves
    /// instead of asking again.
    oracle_exhausted: bool,
    degraded: Vec<String>,
}

impl<'a> Clusterer<'a> {
    pub fn new(
        components: &'a ComponentMap,
        config: &'a EngineConfig,
        gateway: &'a LlmGateway,
        cancel: &'a CancellationToken,
    ) -> Self {
        let repo_name = config
            .repo_dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .filter(|n| !n.is_empty() && n != ".")
            .unwrap_or_else(|| "repository".to_string());
        Self {
            components,
            config,
            gateway,
            cancel,
            repo_name,
            oracle_exhausted: false,
            degraded: Vec::new(),
        }
    }

    /// Build the module tree for the documentable set.
    pub async fn cluster(mut self, leaves: &LeafSet) -> Result<ClusterOutcome> {
        let ids: Vec<String> = leaves.iter().cloned().collect();
        let mut tree = ModuleTree::default();
        if ids.is_empty() {
            return Ok(ClusterOutcome {
                tree,
                degraded: self.degraded,
            });
        }

        let tokens = total_tokens(&ids, self.components);
        if self.is_base_case(&ids, tokens, 0) {
            let name = self.repo_name.clone();
            let description = format!("All components of {}", self.repo_name);
            tree.0.insert(name, Module::leaf(description, ids));
            return Ok(ClusterOutcome {
                tree,
                degraded: self.degraded,
            });
        }

        match self.partition(&ids, tokens, 0).await? {
            Some(groups) => {
                for group in groups {
                    let child = self.build(group.component_ids.clone(), 1).await?;
                    insert_unique(
                        &mut tree.0,
                        group.name,
                        with_description(child, group.description),
                    );
                }
            }
            // Cascade dead: the whole set becomes one leaf module.
            None => {
                let name = self.repo_name.clone();
                let description = format!("All components of {}", self.repo_name);
                tree.0.insert(name, Module::leaf(description, ids));
            }
        }
        Ok(ClusterOutcome {
            tree,
            degraded: self.degraded,
        })
    }

    fn is_base_case(&self, ids: &[String], tokens: u64, depth: u32) -> bool {
        ids.len() < MIN_GROUPS
            || tokens <= self.config.max_token_per_leaf_module
            || depth >= self.config.max_depth
    }

    /// Recursive node construction; the caller names the result.
    fn build(&mut self, ids: Vec<String>, depth: u32) -> BoxFuture<'_, Result<Module>> {
        async move {
            let tokens = total_tokens(&ids, self.components);
            if self.is_base_case(&ids, tokens, depth) {
                return Ok(Module::leaf(String::new(), ids));
            }

            let Some(groups) = self.partition(&ids, tokens, depth).await? else {
                // Cascade dead: collapse this node into a single leaf.
                return Ok(Module::leaf(String::new(), ids));
            };
            let mut children = IndexMap::new();
            for group in groups {
                let child = self.build(group.component_ids.clone(), depth + 1).await?;
                insert_unique(
                    &mut children,
                    group.name,
                    with_description(child, group.description),
                );
            }
            Ok(Module::parent(String::new(), children))
        }
        .boxed()
    }

    /// Ask the oracle for a partition. An oracle that answers but keeps
    /// breaching the contract is replaced by the deterministic split; a dead
    /// cascade returns `None` so the node collapses into a single leaf.
    async fn partition(
        &mut self,
        ids: &[String],
        tokens: u64,
        depth: u32,
    ) -> Result<Option<Vec<PartitionGroup>>> {
        if self.oracle_exhausted {
            return Ok(None);
        }

        match self.oracle_partition(ids, depth).await {
            Ok(Some(groups)) => {
                if let Some(groups) = self.accept(groups, tokens) {
                    return Ok(Some(groups));
                }
                self.note_degraded(depth, "oracle produced no acceptable partition");
                Ok(Some(self.fallback_partition(ids, tokens, depth)))
            }
            Ok(None) => {
                self.note_degraded(depth, "oracle output stayed invalid after repairs");
                Ok(Some(self.fallback_partition(ids, tokens, depth)))
            }
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(err) => {
                self.oracle_exhausted = true;
                self.note_degraded(depth, &err.to_string());
                Ok(None)
            }
        }
    }

    /// One partition conversation: initial request, up to two cover-repair
    /// rounds, and a single re-partition when the group count is off.
    ///
    /// `Ok(None)` means the oracle answered but never satisfied the
    /// contract; `Err` means the cascade itself failed.
    async fn oracle_partition(
        &mut self,
        ids: &[String],
        depth: u32,
    ) -> Result<Option<Vec<PartitionGroup>>> {
        let prompt = self.partition_prompt(ids);
        let mut response = self.ask(&prompt).await?;
        let mut repairs = 0;
        let mut repartitioned = false;

        loop {
            let groups = match parse_partition(&response) {
                Ok(groups) => groups,
                Err(parse_err) => {
                    debug!(depth, "unparseable partition: {parse_err}");
                    if repairs >= REPAIR_ROUNDS {
                        return Ok(None);
                    }
                    repairs += 1;
                    let repair = format!(
                        "{prompt}\n\nYour previous answer was not valid JSON ({parse_err}). \
                         Reply with only the JSON object."
                    );
                    response = self.ask(&repair).await?;
                    continue;
                }
            };

            let cover = check_cover(&groups, ids);
            if !cover.is_exact() {
                debug!(depth, "partition cover mismatch: {}", cover.describe());
                if repairs >= REPAIR_ROUNDS {
                    return Ok(None);
                }
                repairs += 1;
                let repair = format!(
                    "{prompt}\n\nYour previous grouping did not cover the component set \
                     exactly.\n{}\nReturn the corrected JSON object covering every listed \
                     id exactly once.",
                    cover.describe()
                );
                response = self.ask(&repair).await?;
                continue;
            }

            let count = groups.iter().filter(|g| !g.component_ids.is_empty()).count();
            if count < MIN_GROUPS || count > MAX_GROUPS {
                debug!(depth, count, "group count out of range");
                if repartitioned {
                    return Ok(None);
                }
                repartitioned = true;
                let retry = format!(
                    "{prompt}\n\nYour previous answer had {count} usable group(s). Return \
                     between {MIN_GROUPS} and {MAX_GROUPS} non-empty groups."
                );
                response = self.ask(&retry).await?;
                continue;
            }
            return Ok(Some(groups));
        }
    }

    async fn ask(&self, prompt: &str) -> Result<String> {
        match self
            .gateway
            .complete(prompt, Purpose::Cluster, self.cancel)
            .await
        {
            Ok(text) => Ok(text),
            Err(GatewayError::Cancelled) => Err(Error::Cancelled),
            Err(err) => Err(Error::LlmExhausted {
                summary: err.to_string(),
            }),
        }
    }

    fn partition_prompt(&self, ids: &[String]) -> String {
        let mut listing = String::new();
        for id in ids {
            if let Some(component) = self.components.get(id) {
                listing.push_str(&format!("- {} ({})", component.id, component.file_path));
                if !component.depends_on.is_empty() {
                    let deps: Vec<&str> = component
                        .depends_on
                        .iter()
                        .take(8)
                        .map(String::as_str)
                        .collect();
                    listing.push_str(&format!(" [uses: {}]", deps.join(", ")));
                }
                listing.push('\n');
            }
        }
        format!(
            "Partition the following code components of {repo} into coherent \
             documentation modules.\n\nComponents:\n{listing}\n\
             Group components that belong to the same subsystem. Return only a JSON \
             object of the form:\n\
             {{\"groups\": [{{\"name\": \"<short name>\", \"description\": \"<one \
             phrase>\", \"component_ids\": [\"<id>\", ...]}}, ...]}}\n\n\
             Rules: between {MIN_GROUPS} and {MAX_GROUPS} groups; every listed id in \
             exactly one group; do not invent ids.",
            repo = self.repo_name,
        )
    }

    /// Final acceptance checks on an exact cover: usable group count and a
    /// strictly shrinking token estimate per group.
    fn accept(&self, groups: Vec<PartitionGroup>, tokens: u64) -> Option<Vec<PartitionGroup>> {
        let groups: Vec<PartitionGroup> = groups
            .into_iter()
            .filter(|g| !g.component_ids.is_empty())
            .collect();
        if groups.len() < MIN_GROUPS || groups.len() > MAX_GROUPS {
            return None;
        }
        for group in &groups {
            let group_tokens = total_tokens(&group.component_ids, self.components);
            if group_tokens >= tokens {
                return None;
            }
        }
        Some(groups)
    }

    /// Deterministic partition by directory component at the current depth,
    /// with an alphabetic chunk split when everything shares one directory.
    fn fallback_partition(&self, ids: &[String], tokens: u64, depth: u32) -> Vec<PartitionGroup> {
        let mut by_dir: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for id in ids {
            let key = self
                .components
                .get(id)
                .and_then(|c| path_component(&c.file_path, depth as usize))
                .unwrap_or_else(|| "misc".to_string());
            by_dir.entry(key).or_default().push(id.clone());
        }

        if by_dir.len() >= MIN_GROUPS {
            return by_dir
                .into_iter()
                .map(|(key, component_ids)| PartitionGroup {
                    description: format!("Components under {key}"),
                    name: key,
                    component_ids,
                })
                .collect();
        }

        // Everything lives in one directory at this depth: alphabetic chunks
        // of roughly equal size, enough of them to fit the budget.
        let mut sorted = ids.to_vec();
        sorted.sort();
        let budget = self.config.max_token_per_leaf_module.max(1);
        let chunks = (tokens.div_ceil(budget) as usize).max(MIN_GROUPS);
        let size = sorted.len().div_ceil(chunks).max(1);
        sorted
            .chunks(size)
            .enumerate()
            .map(|(i, chunk)| PartitionGroup {
                name: format!("part {}", i + 1),
                description: format!("Components {} through {}", chunk[0], chunk[chunk.len() - 1]),
                component_ids: chunk.to_vec(),
            })
            .collect()
    }

    fn note_degraded(&mut self, depth: u32, reason: &str) {
        warn!(depth, "clustering degraded: {reason}");
        self.degraded.push(format!("depth {depth}: {reason}"));
    }
}

fn with_description(mut module: Module, description: String) -> Module {
    module.description = description;
    module
}

/// Insert keeping LLM order; duplicate names after trimming get a numeric
/// suffix rather than silently merging two groups.
fn insert_unique(map: &mut IndexMap<String, Module>, name: String, module: Module) {
    let name = name.trim().to_string();
    let base = if name.is_empty() { "module".to_string() } else { name };
    if !map.contains_key(&base) {
        map.insert(base, module);
        return;
    }
    let mut n = 2;
    loop {
        let candidate = format!("{base} {n}");
        if !map.contains_key(&candidate) {
            map.insert(candidate, module);
            return;
        }
        n += 1;
    }
}

fn parse_partition(text: &str) -> std::result::Result<Vec<PartitionGroup>, String> {
    let cleaned = fence_strip(text);
    let parsed: PartitionResponse = match serde_json::from_str(cleaned.trim()) {
        Ok(parsed) => parsed,
        Err(first_err) => {
            // Models wrap JSON in prose or language-tagged fences; fish the
            // outermost object out before giving up.
            let start = cleaned.find('{');
            let end = cleaned.rfind('}');
            match (start, end) {
                (Some(start), Some(end)) if start < end => {
                    serde_json::from_str(&cleaned[start..=end]).map_err(|e| e.to_string())?
                }
                _ => return Err(first_err.to_string()),
            }
        }
    };
    if parsed.groups.is_empty() {
        return Err("no groups in response".to_string());
    }
    Ok(parsed.groups)
}

/// `depth`-th path component of a slash-separated path.
fn path_component(path: &str, depth: usize) -> Option<String> {
    path.split(['/', '\\'])
        .filter(|s| !s.is_empty() && *s != ".")
        .nth(depth)
        .map(str::to_string)
}

struct CoverReport {
    missing: Vec<String>,
    unknown: Vec<String>,
    duplicated: Vec<String>,
}

impl CoverReport {
    fn is_exact(&self) -> bool {
        self.missing.is_empty() && self.unknown.is_empty() && self.duplicated.is_empty()
    }

    fn describe(&self) -> String {
        let mut parts = Vec::new();
        if !self.missing.is_empty() {
            parts.push(format!("missing ids: {}", self.missing.join(", ")));
        }
        if !self.unknown.is_empty() {
            parts.push(format!("unknown ids: {}", self.unknown.join(", ")));
        }
        if !self.duplicated.is_empty() {
            parts.push(format!("duplicated ids: {}", self.duplicated.join(", ")));
        }
        parts.join("\n")
    }
}

fn check_cover(groups: &[PartitionGroup], ids: &[String]) -> CoverReport {
    let expected: BTreeSet<&String> = ids.iter().collect();
    let mut seen: BTreeSet<&String> = BTreeSet::new();
    let mut unknown = Vec::new();
    let mut duplicated = Vec::new();
    for group in groups {
        for id in &group.component_ids {
            if !expected.contains(id) {
                unknown.push(id.clone());
            } else if !seen.insert(id) {
                duplicated.push(id.clone());
            }
        }
    }
    let missing = expected
        .iter()
        .filter(|id| !seen.contains(**id))
        .map(|id| (*id).clone())
        .collect();
    CoverReport {
        missing,
        unknown,
        duplicated,
    }
}

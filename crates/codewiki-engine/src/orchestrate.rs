//! Per-module agent orchestration
//!
//! One of two modes, fixed for the whole run: the tool-enabled API agent
//! (no `agent_cmd`) or a one-shot external command over stdio. The scheduler
//! never learns which is in use.

use crate::output::{extract_overview, fence_strip, looks_like_a_document};
use crate::prompt;
use crate::store::{TreeStore, OVERVIEW_FILE};
use codewiki_core::{
    total_tokens, ComponentMap, DocStatus, EngineConfig, Error, Module, ModulePath, ModuleTree,
    Result,
};
use codewiki_llm::{
    BackendError, ChatMessage, GatewayError, LlmBackend, LlmGateway, Purpose, SubprocessBackend,
};
use codewiki_tools::{
    create_complex_registry, create_doc_registry, generator_handle, SubmoduleGenerator,
    ToolRegistry,
};
use indexmap::IndexMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Turn budget for one module's agent loop.
const MAX_AGENT_TURNS: usize = 50;
/// Tool results larger than this are truncated before they re-enter context.
const MAX_TOOL_RESULT_CHARS: usize = 50_000;

/// How a module's artifact gets produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AgentMode {
    Api,
    Subprocess,
}

#[derive(Clone)]
pub struct Orchestrator {
    config: EngineConfig,
    components: Arc<ComponentMap>,
    gateway: Arc<LlmGateway>,
    store: TreeStore,
    mode: AgentMode,
}

impl Orchestrator {
    pub fn new(
        config: EngineConfig,
        components: Arc<ComponentMap>,
        gateway: Arc<LlmGateway>,
        store: TreeStore,
    ) -> Self {
        let mode = if config.subprocess_mode() {
            AgentMode::Subprocess
        } else {
            AgentMode::Api
        };
        Self {
            config,
            components,
            gateway,
            store,
            mode,
        }
    }

    pub fn mode(&self) -> AgentMode {
        self.mode
    }

    /// Produce the artifact for the module at `path` and return the file
    /// name written under docs_dir.
    pub async fn process_module(
        &self,
        tree: &ModuleTree,
        path: &[String],
        cancel: &CancellationToken,
    ) -> Result<String> {
        let module = tree
            .get(path)
            .ok_or_else(|| Error::module_failed(path.join("/"), "module not found in tree"))?;
        let name = path.last().cloned().unwrap_or_default();
        let doc_file = module.doc_file.clone();
        if doc_file.is_empty() {
            return Err(Error::module_failed(&name, "no doc file assigned"));
        }

        if module.is_leaf() {
            match self.mode {
                AgentMode::Subprocess => {
                    self.subprocess_leaf(tree, path, module, &name, &doc_file, cancel)
                        .await
                }
                AgentMode::Api => {
                    self.api_leaf(tree, path, module, &name, &doc_file, cancel)
                        .await
                }
            }
        } else {
            self.generate_parent(tree, path, module, &name, &doc_file, cancel)
                .await
        }
    }

    /// Synthesize the repository overview over the whole tree. Returns the
    /// overview file name.
    pub async fn generate_overview(
        &self,
        tree: &ModuleTree,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let child_docs = self.collect_docs(tree.0.iter()).await;
        let payload = prompt::contextual_payload(tree, &[], &child_docs);
        let name = "repository overview";
        let system = self.overview_system_prompt(tree);

        let outcome = match self.mode {
            AgentMode::Subprocess => {
                let text = prompt::subprocess_parent_prompt(&system, name, &payload);
                match self.run_subprocess(&text, cancel).await {
                    Ok(out) => {
                        let doc = extract_overview(&out);
                        if looks_like_a_document(&doc) {
                            self.store.write_markdown(OVERVIEW_FILE, &doc).await?;
                            Ok(OVERVIEW_FILE.to_string())
                        } else {
                            Err(Error::invalid_output(name, "output too short"))
                        }
                    }
                    Err(err) => Err(err),
                }
            }
            AgentMode::Api => {
                self.run_agent_loop(
                    tree,
                    &[],
                    system,
                    prompt::parent_task(name, &payload, OVERVIEW_FILE),
                    OVERVIEW_FILE,
                    Purpose::Overview,
                    cancel,
                )
                .await
            }
        };

        match outcome {
            Ok(file) => Ok(file),
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(err) if tree.is_empty() => {
                // An empty repository still gets an overview note.
                warn!("overview generation failed on empty tree: {err}, writing stub");
                self.store
                    .write_markdown(
                        OVERVIEW_FILE,
                        "# Repository overview\n\nThis repository contains no \
                         documentable components.\n",
                    )
                    .await?;
                Ok(OVERVIEW_FILE.to_string())
            }
            Err(err) => Err(err),
        }
    }

    fn overview_system_prompt(&self, tree: &ModuleTree) -> String {
        let root = Module::parent("Repository overview", IndexMap::new());
        prompt::system_prompt(
            &[],
            &root,
            tree,
            self.config.custom_instructions.as_deref(),
            "",
        )
    }

    // -- subprocess mode ----------------------------------------------------

    async fn subprocess_leaf(
        &self,
        tree: &ModuleTree,
        path: &[String],
        module: &Module,
        name: &str,
        doc_file: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let system = prompt::system_prompt(
            path,
            module,
            tree,
            self.config.custom_instructions.as_deref(),
            "",
        );
        let text = prompt::subprocess_leaf_prompt(&system, name, module, &self.components);
        let out = self.run_subprocess(&text, cancel).await?;
        let doc = fence_strip(&out);
        if !looks_like_a_document(&doc) {
            return Err(Error::invalid_output(name, "output too short"));
        }
        self.store.write_markdown(doc_file, &doc).await?;
        info!(module = name, file = doc_file, "leaf documented (subprocess)");
        Ok(doc_file.to_string())
    }

    async fn run_subprocess(&self, prompt: &str, cancel: &CancellationToken) -> Result<String> {
        let Some(cmd) = self.config.agent_cmd.as_deref() else {
            return Err(Error::module_failed("subprocess", "agent_cmd not set"));
        };
        let backend =
            SubprocessBackend::new(cmd).with_workdir(self.store.docs_dir().to_path_buf());
        match backend.complete(prompt, self.config.max_tokens, cancel).await {
            Ok(out) => Ok(out),
            Err(BackendError::Cancelled) => Err(Error::Cancelled),
            Err(err) => Err(Error::module_exhausted("subprocess", err.to_string())),
        }
    }

    // -- API mode -----------------------------------------------------------

    async fn api_leaf(
        &self,
        tree: &ModuleTree,
        path: &[String],
        module: &Module,
        name: &str,
        doc_file: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let registry = self.registry_for(tree, path, module, cancel);
        let system = prompt::system_prompt(
            path,
            module,
            tree,
            self.config.custom_instructions.as_deref(),
            &registry.combined_prompts(),
        );
        self.drive_agent(
            registry,
            system,
            prompt::leaf_task(name, module, doc_file),
            name,
            doc_file,
            Purpose::LeafDoc,
            cancel,
        )
        .await
    }

    async fn run_agent_loop(
        &self,
        tree: &ModuleTree,
        path: &[String],
        system: String,
        task: String,
        doc_file: &str,
        purpose: Purpose,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let module_owned;
        let module = match tree.get(path) {
            Some(module) => module,
            None => {
                module_owned = Module::parent(String::new(), IndexMap::new());
                &module_owned
            }
        };
        let registry = self.registry_for(tree, path, module, cancel);
        let name = path.last().cloned().unwrap_or_else(|| "overview".into());
        self.drive_agent(registry, system, task, &name, doc_file, purpose, cancel)
            .await
    }

    /// The cooperative agent loop: request, apply tool calls sequentially,
    /// feed results back, until a terminal message or the turn budget.
    #[allow(clippy::too_many_arguments)]
    async fn drive_agent(
        &self,
        registry: ToolRegistry,
        system: String,
        task: String,
        name: &str,
        doc_file: &str,
        purpose: Purpose,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let specs = registry.specs();
        let mut messages = vec![ChatMessage::system(system), ChatMessage::user(task)];

        for turn in 0..MAX_AGENT_TURNS {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let outcome = match self.gateway.chat(&messages, &specs, purpose, cancel).await {
                Ok(outcome) => outcome,
                Err(GatewayError::Cancelled) => return Err(Error::Cancelled),
                Err(err) => return Err(Error::module_exhausted(name, err.to_string())),
            };

            messages.push(ChatMessage::assistant(
                outcome.text.clone(),
                outcome.tool_calls.clone(),
            ));
            if outcome.is_terminal() {
                debug!(module = name, turn, "agent finished");
                break;
            }

            for call in &outcome.tool_calls {
                let result = match call.parse_arguments() {
                    Ok(args) => registry.execute(&call.name, args).await,
                    Err(e) => codewiki_tools::ToolResult::error(format!(
                        "arguments were not valid JSON: {e}"
                    )),
                };
                let mut content = result.to_content_string();
                if content.len() > MAX_TOOL_RESULT_CHARS {
                    let cut = floor_char_boundary(&content, MAX_TOOL_RESULT_CHARS);
                    content = format!(
                        "{}...\n[truncated, {} total chars]",
                        &content[..cut],
                        content.len()
                    );
                }
                debug!(module = name, tool = %call.name, error = result.is_error(), "tool call");
                messages.push(ChatMessage::tool_result(&call.id, content));
            }
        }

        self.verify_artifact(name, doc_file).await
    }

    /// The agent must have created the artifact itself; check before
    /// reporting success.
    async fn verify_artifact(&self, name: &str, doc_file: &str) -> Result<String> {
        let path = self.store.docs_dir().join(doc_file);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) if !content.trim().is_empty() => {
                info!(module = name, file = doc_file, "documented (agent)");
                Ok(doc_file.to_string())
            }
            Ok(_) => Err(Error::invalid_output(
                name,
                format!("agent created an empty {doc_file}"),
            )),
            Err(_) => Err(Error::invalid_output(
                name,
                format!("agent did not create {doc_file}"),
            )),
        }
    }

    /// Complexity gate: many components at this level, or a component token
    /// load past half the response budget, buys the recursive tool.
    fn is_complex(&self, tree: &ModuleTree, path: &[String], module: &Module) -> bool {
        let (count, tokens) = if module.is_leaf() {
            (
                module.components.len(),
                total_tokens(&module.components, &self.components),
            )
        } else {
            let mut ids = Vec::new();
            if let Some(subtree) = tree.get(path) {
                collect_ids(subtree, &mut ids);
            }
            (ids.len(), total_tokens(&ids, &self.components))
        };
        count > 10 || tokens > self.config.max_tokens / 2
    }

    fn registry_for(
        &self,
        tree: &ModuleTree,
        path: &[String],
        module: &Module,
        cancel: &CancellationToken,
    ) -> ToolRegistry {
        if self.is_complex(tree, path, module) {
            let handle = generator_handle();
            let generator: Arc<dyn SubmoduleGenerator> = Arc::new(ChildGenerator {
                orchestrator: self.clone(),
                tree: tree.clone(),
                parent_path: path.to_vec(),
                cancel: cancel.clone(),
            });
            // The handle is filled synchronously before the registry is used;
            // try_write cannot contend here.
            if let Ok(mut slot) = handle.try_write() {
                *slot = Some(generator);
            }
            create_complex_registry(
                self.components.clone(),
                self.store.docs_dir(),
                &self.config.repo_dir,
                handle,
            )
        } else {
            create_doc_registry(
                self.components.clone(),
                self.store.docs_dir(),
                &self.config.repo_dir,
            )
        }
    }

    // -- parents ------------------------------------------------------------

    async fn generate_parent(
        &self,
        tree: &ModuleTree,
        path: &[String],
        module: &Module,
        name: &str,
        doc_file: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let child_docs = self.collect_docs(module.children.iter()).await;
        let payload = prompt::contextual_payload(tree, path, &child_docs);

        match self.mode {
            AgentMode::Subprocess => {
                let system = prompt::system_prompt(
                    path,
                    module,
                    tree,
                    self.config.custom_instructions.as_deref(),
                    "",
                );
                let text = prompt::subprocess_parent_prompt(&system, name, &payload);
                let out = self.run_subprocess(&text, cancel).await?;
                let doc = extract_overview(&out);
                if !looks_like_a_document(&doc) {
                    return Err(Error::invalid_output(name, "output too short"));
                }
                self.store.write_markdown(doc_file, &doc).await?;
                info!(module = name, file = doc_file, "parent documented (subprocess)");
                Ok(doc_file.to_string())
            }
            AgentMode::Api => {
                let system = prompt::system_prompt(
                    path,
                    module,
                    tree,
                    self.config.custom_instructions.as_deref(),
                    "",
                );
                self.run_agent_loop(
                    tree,
                    path,
                    system,
                    prompt::parent_task(name, &payload, doc_file),
                    doc_file,
                    Purpose::Overview,
                    cancel,
                )
                .await
            }
        }
    }

    /// Read the finished markdown of the given modules, skipping any that
    /// have not produced a file yet.
    async fn collect_docs<'m>(
        &self,
        modules: impl Iterator<Item = (&'m String, &'m Module)>,
    ) -> IndexMap<String, String> {
        let mut docs = IndexMap::new();
        for (name, module) in modules {
            let file = if module.doc_status == DocStatus::Done && !module.doc_path.is_empty() {
                module.doc_path.clone()
            } else {
                module.doc_file.clone()
            };
            if file.is_empty() {
                continue;
            }
            if let Ok(content) = tokio::fs::read_to_string(self.store.docs_dir().join(&file)).await
            {
                if !content.trim().is_empty() {
                    docs.insert(name.clone(), content);
                }
            }
        }
        docs
    }
}

fn collect_ids(module: &Module, out: &mut Vec<String>) {
    out.extend(module.components.iter().cloned());
    for child in module.children.values() {
        collect_ids(child, out);
    }
}

fn floor_char_boundary(text: &str, max: usize) -> usize {
    let mut cut = max.min(text.len());
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    cut
}

/// Recursive descent for the `generate_sub_module_documentation` tool: each
/// named child runs through the same orchestrator, already-finished children
/// are acknowledged without regeneration.
struct ChildGenerator {
    orchestrator: Orchestrator,
    tree: ModuleTree,
    parent_path: ModulePath,
    cancel: CancellationToken,
}

#[async_trait::async_trait]
impl SubmoduleGenerator for ChildGenerator {
    async fn generate(&self, child_names: &[String]) -> std::result::Result<String, String> {
        let mut lines = Vec::with_capacity(child_names.len());
        for name in child_names {
            if self.cancel.is_cancelled() {
                return Err("cancelled".to_string());
            }
            let mut path = self.parent_path.clone();
            path.push(name.clone());
            let Some(child) = self.tree.get(&path) else {
                lines.push(format!("{name}: no such child module"));
                continue;
            };
            if child.doc_status == DocStatus::Done
                && self
                    .orchestrator
                    .store
                    .doc_exists_nonempty(&child.doc_path)
                    .await
            {
                lines.push(format!("{name}: already documented at {}", child.doc_path));
                continue;
            }
            match self
                .orchestrator
                .process_module(&self.tree, &path, &self.cancel)
                .await
            {
                Ok(file) => lines.push(format!("{name}: documented at {file}")),
                Err(Error::Cancelled) => return Err("cancelled".to_string()),
                Err(err) => lines.push(format!("{name}: failed ({err})")),
            }
        }
        Ok(lines.join("\n"))
    }
}

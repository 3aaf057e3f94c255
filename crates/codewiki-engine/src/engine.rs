//! Engine entry point: cluster (or resume), schedule, summarize

use crate::cluster::Clusterer;
use crate::orchestrate::Orchestrator;
use crate::schedule::Scheduler;
use crate::store::{read_commit_id, Metadata, MetadataCounts, TreeStore, OVERVIEW_FILE};
use codewiki_core::{
    ComponentMap, DocStatus, EngineConfig, Error, LeafSet, ModuleFailure, ModuleTree,
    ProgressSink, Result, RunSummary, TracingSink,
};
use codewiki_llm::LlmGateway;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Everything a run needs, threaded explicitly instead of living in
/// globals.
pub struct EngineContext {
    pub config: EngineConfig,
    pub components: Arc<ComponentMap>,
    pub leaves: LeafSet,
    pub gateway: Arc<LlmGateway>,
    pub sink: Arc<dyn ProgressSink>,
    pub cancel: CancellationToken,
}

impl EngineContext {
    pub fn new(config: EngineConfig, components: ComponentMap, leaves: LeafSet) -> Self {
        let gateway = Arc::new(LlmGateway::from_config(&config));
        Self {
            config,
            components: Arc::new(components),
            leaves,
            gateway,
            sink: Arc::new(TracingSink),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_gateway(mut self, gateway: Arc<LlmGateway>) -> Self {
        self.gateway = gateway;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

pub struct Engine;

impl Engine {
    /// Run one documentation pass. Returns the summary, or
    /// [`Error::Cancelled`] when the caller's token fired (partial state
    /// stays consistent on disk either way).
    pub async fn run(ctx: EngineContext) -> Result<RunSummary> {
        ctx.config.validate()?;
        let store = TreeStore::new(&ctx.config.docs_dir);
        store.ensure_dir().await?;

        let mut tree = match store.load_tree().await? {
            Some(tree) => tree,
            None => {
                let clusterer =
                    Clusterer::new(&ctx.components, &ctx.config, &ctx.gateway, &ctx.cancel);
                let outcome = clusterer.cluster(&ctx.leaves).await?;
                for note in &outcome.degraded {
                    warn!("clustering degraded: {note}");
                }
                let mut tree = outcome.tree;
                tree.assign_doc_files();
                store.save_first_tree(&tree).await?;
                store.save_tree(&tree).await?;
                tree
            }
        };

        info!(
            modules = tree.module_count(),
            leaves = tree.leaf_count(),
            depth = tree.depth(),
            "module tree ready"
        );

        let orchestrator = Arc::new(Orchestrator::new(
            ctx.config.clone(),
            ctx.components.clone(),
            ctx.gateway.clone(),
            store.clone(),
        ));
        let scheduler = Scheduler::new(ctx.config.concurrency, ctx.config.fail_fast);
        let report = scheduler
            .run(
                &mut tree,
                orchestrator,
                &store,
                ctx.sink.as_ref(),
                &ctx.cancel,
            )
            .await?;

        let violations = tree.violations(&ctx.components, ctx.config.max_depth.max(1));
        for violation in &violations {
            warn!("tree invariant violated: {violation}");
        }

        let metadata = build_metadata(&ctx, &tree, &store, &report.failed).await;
        store.write_metadata(&metadata).await?;

        let summary = RunSummary {
            ok: !report.cancelled && report.failed.is_empty(),
            modules_total: tree.module_count() + 1,
            modules_done: report.done + report.skipped,
            modules_failed: report.failed.len(),
            failures: report.failed,
        };

        if report.cancelled {
            info!(
                done = summary.modules_done,
                "run cancelled, partial state preserved"
            );
            return Err(Error::Cancelled);
        }
        info!(
            done = summary.modules_done,
            failed = summary.modules_failed,
            "run complete"
        );
        Ok(summary)
    }
}

async fn build_metadata(
    ctx: &EngineContext,
    tree: &ModuleTree,
    store: &TreeStore,
    failed: &[ModuleFailure],
) -> Metadata {
    let mut files = Vec::new();
    if store.doc_exists_nonempty(OVERVIEW_FILE).await {
        files.push(OVERVIEW_FILE.to_string());
    }
    tree.for_each(|_, module| {
        if module.doc_status == DocStatus::Done
            && !module.doc_path.is_empty()
            && module.doc_path != OVERVIEW_FILE
        {
            files.push(module.doc_path.clone());
        }
    });

    Metadata {
        generated_at: chrono::Utc::now().to_rfc3339(),
        commit_id: read_commit_id(&ctx.config.repo_dir).await,
        main_model: ctx.config.main_model.clone(),
        fallback_models: ctx.config.fallback_models.clone(),
        models_used: ctx.gateway.backends_used(),
        counts: MetadataCounts {
            components: ctx.components.len(),
            leaf_nodes: tree.leaf_count(),
            modules: tree.module_count(),
            max_depth: tree.depth(),
        },
        files,
        errors: failed.iter().map(ModuleFailure::to_string).collect(),
    }
}

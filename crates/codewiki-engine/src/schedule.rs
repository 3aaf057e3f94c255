//! Dependency-ordered execution over the module tree
//!
//! Leaves run under a semaphore of `concurrency` permits; parents run
//! sequentially on this task once their subtree is complete; the repository
//! overview goes last. The in-memory tree is mutated only here, and every
//! completed module is persisted before the next dispatch decision.

use crate::orchestrate::Orchestrator;
use crate::store::{TreeStore, OVERVIEW_FILE};
use codewiki_core::{
    DocStatus, Error, FailureKind, ModuleFailure, ModuleKind, ModulePath, ModuleTree,
    ProgressEvent, ProgressPhase, ProgressSink, Result,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct ScheduleReport {
    pub done: usize,
    pub skipped: usize,
    pub failed: Vec<ModuleFailure>,
    pub cancelled: bool,
}

impl ScheduleReport {
    fn new() -> Self {
        Self {
            done: 0,
            skipped: 0,
            failed: Vec::new(),
            cancelled: false,
        }
    }
}

pub struct Scheduler {
    concurrency: usize,
    fail_fast: bool,
}

struct Progress<'a> {
    sink: &'a dyn ProgressSink,
    total: usize,
    started: usize,
    index_of: HashMap<ModulePath, usize>,
    started_at: HashMap<ModulePath, Instant>,
}

impl<'a> Progress<'a> {
    fn new(sink: &'a dyn ProgressSink, total: usize) -> Self {
        Self {
            sink,
            total,
            started: 0,
            index_of: HashMap::new(),
            started_at: HashMap::new(),
        }
    }

    fn start(&mut self, path: &ModulePath, kind: ModuleKind) {
        self.started += 1;
        self.index_of.insert(path.clone(), self.started);
        self.started_at.insert(path.clone(), Instant::now());
        self.emit(path, ProgressPhase::Start, kind);
    }

    fn finish(&mut self, path: &ModulePath, phase: ProgressPhase, kind: ModuleKind) {
        self.emit(path, phase, kind);
    }

    fn emit(&self, path: &ModulePath, phase: ProgressPhase, kind: ModuleKind) {
        let elapsed_ms = match phase {
            ProgressPhase::Start => 0,
            _ => self
                .started_at
                .get(path)
                .map(|t| t.elapsed().as_millis() as u64)
                .unwrap_or(0),
        };
        self.sink.emit(&ProgressEvent {
            index: self.index_of.get(path).copied().unwrap_or(self.started),
            total: self.total,
            phase,
            module_name: path.last().cloned().unwrap_or_else(|| "overview".into()),
            elapsed_ms,
            kind,
        });
    }
}

impl Scheduler {
    pub fn new(concurrency: usize, fail_fast: bool) -> Self {
        Self {
            concurrency: concurrency.max(1),
            fail_fast,
        }
    }

    pub async fn run(
        &self,
        tree: &mut ModuleTree,
        orchestrator: Arc<Orchestrator>,
        store: &TreeStore,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<ScheduleReport> {
        let mut report = ScheduleReport::new();
        let total = tree.module_count() + 1; // + repository overview
        let mut progress = Progress::new(sink, total);
        // Child token so fail-fast can stop dispatch without looking like a
        // caller cancellation.
        let work_cancel = cancel.child_token();

        self.run_leaves(tree, &orchestrator, store, &mut progress, &work_cancel, &mut report)
            .await?;

        if !work_cancel.is_cancelled() {
            self.run_parents(tree, &orchestrator, store, &mut progress, &work_cancel, &mut report)
                .await?;
        }

        if !work_cancel.is_cancelled() {
            self.run_overview(tree, &orchestrator, store, &mut progress, &work_cancel, &mut report)
                .await?;
        }

        report.cancelled = cancel.is_cancelled();
        Ok(report)
    }

    async fn run_leaves(
        &self,
        tree: &mut ModuleTree,
        orchestrator: &Arc<Orchestrator>,
        store: &TreeStore,
        progress: &mut Progress<'_>,
        work_cancel: &CancellationToken,
        report: &mut ScheduleReport,
    ) -> Result<()> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks: JoinSet<(ModulePath, Result<String>)> = JoinSet::new();
        let mut previous_status: HashMap<ModulePath, DocStatus> = HashMap::new();
        let snapshot = Arc::new(tree.clone());

        for path in tree.leaf_paths() {
            let (status, doc_path) = match tree.get(&path) {
                Some(module) => (module.doc_status, module.doc_path.clone()),
                None => continue,
            };
            if status == DocStatus::Done && store.doc_exists_nonempty(&doc_path).await {
                progress.start(&path, ModuleKind::Leaf);
                progress.finish(&path, ProgressPhase::Skip, ModuleKind::Leaf);
                report.skipped += 1;
                continue;
            }

            previous_status.insert(path.clone(), status);
            if let Some(module) = tree.get_mut(&path) {
                module.doc_status = DocStatus::InProgress;
            }
            progress.start(&path, ModuleKind::Leaf);

            let orchestrator = orchestrator.clone();
            let snapshot = snapshot.clone();
            let semaphore = semaphore.clone();
            let task_cancel = work_cancel.clone();
            tasks.spawn(async move {
                let _permit = tokio::select! {
                    permit = semaphore.acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => return (path, Err(Error::Cancelled)),
                    },
                    _ = task_cancel.cancelled() => return (path, Err(Error::Cancelled)),
                };
                let result = orchestrator
                    .process_module(&snapshot, &path, &task_cancel)
                    .await;
                (path, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let (path, result) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("leaf worker panicked: {e}");
                    continue;
                }
            };
            match result {
                Ok(doc_file) => {
                    if let Some(module) = tree.get_mut(&path) {
                        module.doc_status = DocStatus::Done;
                        module.doc_path = doc_file;
                    }
                    store.save_tree(tree).await?;
                    progress.finish(&path, ProgressPhase::Done, ModuleKind::Leaf);
                    report.done += 1;
                }
                Err(Error::Cancelled) => {
                    self.revert(tree, &path, &previous_status);
                }
                Err(err) => {
                    // On-disk state is untouched so a later run retries this
                    // module; only the report remembers the failure.
                    self.revert(tree, &path, &previous_status);
                    progress.finish(&path, ProgressPhase::Error, ModuleKind::Leaf);
                    report.failed.push(ModuleFailure {
                        module: path.join("/"),
                        kind: err.failure_kind(),
                        message: err.to_string(),
                    });
                    if self.fail_fast {
                        info!("fail-fast: stopping dispatch after first failure");
                        work_cancel.cancel();
                    }
                }
            }
        }
        Ok(())
    }

    fn revert(
        &self,
        tree: &mut ModuleTree,
        path: &ModulePath,
        previous_status: &HashMap<ModulePath, DocStatus>,
    ) {
        if let Some(module) = tree.get_mut(path) {
            module.doc_status = previous_status
                .get(path)
                .copied()
                .unwrap_or(DocStatus::Absent);
        }
    }

    async fn run_parents(
        &self,
        tree: &mut ModuleTree,
        orchestrator: &Arc<Orchestrator>,
        store: &TreeStore,
        progress: &mut Progress<'_>,
        work_cancel: &CancellationToken,
        report: &mut ScheduleReport,
    ) -> Result<()> {
        for path in tree.parent_paths_postorder() {
            if work_cancel.is_cancelled() {
                return Ok(());
            }
            let Some(module) = tree.get(&path) else { continue };

            if module.doc_status == DocStatus::Done
                && store.doc_exists_nonempty(&module.doc_path).await
            {
                progress.start(&path, ModuleKind::Parent);
                progress.finish(&path, ProgressPhase::Skip, ModuleKind::Parent);
                report.skipped += 1;
                continue;
            }

            let pending: Vec<&String> = module
                .children
                .iter()
                .filter(|(_, child)| child.doc_status != DocStatus::Done)
                .map(|(name, _)| name)
                .collect();
            if !pending.is_empty() {
                let reason = format!(
                    "blocked: children not documented: {}",
                    pending
                        .iter()
                        .map(|s| s.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                );
                progress.start(&path, ModuleKind::Parent);
                progress.finish(&path, ProgressPhase::Error, ModuleKind::Parent);
                report.failed.push(ModuleFailure {
                    module: path.join("/"),
                    kind: FailureKind::Blocked,
                    message: reason,
                });
                continue;
            }

            let previous = module.doc_status;
            if let Some(module) = tree.get_mut(&path) {
                module.doc_status = DocStatus::InProgress;
            }
            progress.start(&path, ModuleKind::Parent);

            let snapshot = Arc::new(tree.clone());
            match orchestrator
                .process_module(&snapshot, &path, work_cancel)
                .await
            {
                Ok(doc_file) => {
                    if let Some(module) = tree.get_mut(&path) {
                        module.doc_status = DocStatus::Done;
                        module.doc_path = doc_file;
                    }
                    store.save_tree(tree).await?;
                    progress.finish(&path, ProgressPhase::Done, ModuleKind::Parent);
                    report.done += 1;
                }
                Err(Error::Cancelled) => {
                    if let Some(module) = tree.get_mut(&path) {
                        module.doc_status = previous;
                    }
                    return Ok(());
                }
                Err(err) => {
                    if let Some(module) = tree.get_mut(&path) {
                        module.doc_status = previous;
                    }
                    progress.finish(&path, ProgressPhase::Error, ModuleKind::Parent);
                    report.failed.push(ModuleFailure {
                        module: path.join("/"),
                        kind: err.failure_kind(),
                        message: err.to_string(),
                    });
                    if self.fail_fast {
                        work_cancel.cancel();
                        return Ok(());
                    }
                }
            }
        }
        Ok(())
    }

    async fn run_overview(
        &self,
        tree: &mut ModuleTree,
        orchestrator: &Arc<Orchestrator>,
        store: &TreeStore,
        progress: &mut Progress<'_>,
        work_cancel: &CancellationToken,
        report: &mut ScheduleReport,
    ) -> Result<()> {
        let overview_path: ModulePath = Vec::new();
        let mut all_done = true;
        tree.for_each(|_, module| {
            if module.doc_status != DocStatus::Done {
                all_done = false;
            }
        });

        // Degenerate single-module repository: its document becomes the
        // overview instead of synthesizing a second one.
        if tree.module_count() == 1 {
            let path = tree.leaf_paths().into_iter().next().unwrap_or_default();
            let Some(module) = tree.get(&path) else { return Ok(()) };
            if module.doc_status != DocStatus::Done {
                debug!("single module not documented, no overview to promote");
                return Ok(());
            }
            progress.start(&overview_path, ModuleKind::Overview);
            if module.doc_path != OVERVIEW_FILE {
                let from = module.doc_path.clone();
                store.rename_markdown(&from, OVERVIEW_FILE).await?;
                if let Some(module) = tree.get_mut(&path) {
                    module.doc_path = OVERVIEW_FILE.to_string();
                    module.doc_file = OVERVIEW_FILE.to_string();
                }
                store.save_tree(tree).await?;
            }
            progress.finish(&overview_path, ProgressPhase::Done, ModuleKind::Overview);
            report.done += 1;
            return Ok(());
        }

        if !all_done && !tree.is_empty() {
            progress.start(&overview_path, ModuleKind::Overview);
            progress.finish(&overview_path, ProgressPhase::Error, ModuleKind::Overview);
            report.failed.push(ModuleFailure {
                module: "overview".into(),
                kind: FailureKind::Blocked,
                message: "blocked: not all modules documented".into(),
            });
            return Ok(());
        }

        if store.doc_exists_nonempty(OVERVIEW_FILE).await {
            progress.start(&overview_path, ModuleKind::Overview);
            progress.finish(&overview_path, ProgressPhase::Skip, ModuleKind::Overview);
            report.skipped += 1;
            return Ok(());
        }

        progress.start(&overview_path, ModuleKind::Overview);
        let snapshot = tree.clone();
        match orchestrator.generate_overview(&snapshot, work_cancel).await {
            Ok(_) => {
                progress.finish(&overview_path, ProgressPhase::Done, ModuleKind::Overview);
                report.done += 1;
            }
            Err(Error::Cancelled) => {}
            Err(err) => {
                progress.finish(&overview_path, ProgressPhase::Error, ModuleKind::Overview);
                report.failed.push(ModuleFailure {
                    module: "overview".into(),
                    kind: err.failure_kind(),
                    message: err.to_string(),
                });
            }
        }
        Ok(())
    }
}

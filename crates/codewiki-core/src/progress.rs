//! Progress events — advisory lifecycle stream for callers

use std::sync::Mutex;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProgressPhase {
    Start,
    Done,
    Skip,
    Error,
}

impl std::fmt::Display for ProgressPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::Done => write!(f, "done"),
            Self::Skip => write!(f, "skip"),
            Self::Error => write!(f, "error"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModuleKind {
    Leaf,
    Parent,
    Overview,
}

impl std::fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Leaf => write!(f, "leaf"),
            Self::Parent => write!(f, "parent"),
            Self::Overview => write!(f, "overview"),
        }
    }
}

/// One module transition. Events for a single module arrive in order
/// `start` then one of `done`/`skip`/`error`.
#[derive(Clone, Debug)]
pub struct ProgressEvent {
    pub index: usize,
    pub total: usize,
    pub phase: ProgressPhase,
    pub module_name: String,
    pub elapsed_ms: u64,
    pub kind: ModuleKind,
}

/// Receives progress events from the scheduler task. Emission happens from
/// a single task, so implementations only need interior mutability.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: &ProgressEvent);
}

/// Default sink: log each transition through `tracing`.
#[derive(Default)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn emit(&self, event: &ProgressEvent) {
        tracing::info!(
            module = %event.module_name,
            kind = %event.kind,
            elapsed_ms = event.elapsed_ms,
            "[{}/{}] {}",
            event.index,
            event.total,
            event.phase,
        );
    }
}

/// Collects every event in memory; used by tests to assert ordering.
#[derive(Default)]
pub struct CollectingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().map(|g| g.clone()).unwrap_or_default()
    }
}

impl ProgressSink for CollectingSink {
    fn emit(&self, event: &ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

//! Shared data model for the codewiki engine: components, the module tree,
//! configuration, errors, and progress events.

pub mod component;
pub mod config;
pub mod error;
pub mod manifest;
pub mod module;
pub mod progress;
pub mod sanitize;

pub use component::{estimate_tokens, total_tokens, Component, ComponentKind, ComponentMap, LeafSet};
pub use config::EngineConfig;
pub use error::{Error, FailureKind, Result};
pub use manifest::RepoManifest;
pub use module::{DocStatus, Module, ModulePath, ModuleTree};
pub use progress::{
    CollectingSink, ModuleKind, ProgressEvent, ProgressPhase, ProgressSink, TracingSink,
};
pub use sanitize::sanitize;

/// One failed module in a run report, with its cause classification.
#[derive(Clone, Debug)]
pub struct ModuleFailure {
    pub module: String,
    pub kind: FailureKind,
    pub message: String,
}

impl std::fmt::Display for ModuleFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.module, self.message)
    }
}

/// Outcome summary returned by the engine.
#[derive(Clone, Debug, Default)]
pub struct RunSummary {
    pub ok: bool,
    pub modules_total: usize,
    pub modules_done: usize,
    pub modules_failed: usize,
    pub failures: Vec<ModuleFailure>,
}

impl RunSummary {
    /// Per-module error lines, as persisted in metadata.
    pub fn error_strings(&self) -> Vec<String> {
        self.failures.iter().map(ModuleFailure::to_string).collect()
    }
}

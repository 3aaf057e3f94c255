//! Error taxonomy shared across the engine crates

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Why a module could not be generated. Callers use this to tell a dead
/// backend cascade apart from an agent that answered badly.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    /// Every configured backend failed for the module's requests.
    Exhausted,
    /// The agent answered but produced no usable document.
    InvalidOutput,
    /// A descendant failed first, so this module was never attempted.
    Blocked,
    /// Filesystem or bookkeeping error.
    Other,
}

#[derive(Error, Debug)]
pub enum Error {
    /// Missing credentials or contradictory options. Fatal before a run starts.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// A clustering request could not be served by the LLM and the
    /// deterministic fallback was used instead. Warned, not fatal.
    #[error("clustering degraded: {0}")]
    ClusteringDegraded(String),

    /// Every configured backend failed for one request.
    #[error("all llm backends failed: {summary}")]
    LlmExhausted { summary: String },

    /// One module could not be generated. The run continues and the module
    /// stays retryable on resume.
    #[error("module '{module}' failed: {message}")]
    ModuleFailed {
        module: String,
        message: String,
        kind: FailureKind,
    },

    /// An atomic write or read under docs_dir failed.
    #[error("filesystem error at {path}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Cooperative cancellation observed; partial state is preserved on disk.
    #[error("cancelled")]
    Cancelled,

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigInvalid(message.into())
    }

    pub fn module_failed(module: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ModuleFailed {
            module: module.into(),
            message: message.into(),
            kind: FailureKind::Other,
        }
    }

    /// Module failure caused by a dead backend cascade.
    pub fn module_exhausted(module: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ModuleFailed {
            module: module.into(),
            message: message.into(),
            kind: FailureKind::Exhausted,
        }
    }

    /// Module failure caused by unusable agent output.
    pub fn invalid_output(module: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ModuleFailed {
            module: module.into(),
            message: message.into(),
            kind: FailureKind::InvalidOutput,
        }
    }

    pub fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Filesystem {
            path: path.into(),
            source,
        }
    }

    /// Classification used by failure reports.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::ModuleFailed { kind, .. } => *kind,
            Self::LlmExhausted { .. } => FailureKind::Exhausted,
            _ => FailureKind::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_kinds_survive_the_module_wrapper() {
        assert_eq!(
            Error::module_exhausted("a", "all dead").failure_kind(),
            FailureKind::Exhausted
        );
        assert_eq!(
            Error::invalid_output("a", "too short").failure_kind(),
            FailureKind::InvalidOutput
        );
        assert_eq!(
            Error::module_failed("a", "lost").failure_kind(),
            FailureKind::Other
        );
        let exhausted = Error::LlmExhausted {
            summary: "primary: 500".into(),
        };
        assert_eq!(exhausted.failure_kind(), FailureKind::Exhausted);
        assert_eq!(Error::Cancelled.failure_kind(), FailureKind::Other);
    }
}

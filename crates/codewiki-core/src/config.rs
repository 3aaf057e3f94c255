//! Engine configuration

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Validated configuration for one documentation run.
///
/// Credential resolution and flag parsing happen upstream; the engine only
/// sees this struct and trusts it after [`EngineConfig::validate`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Output directory for the tree files and markdown artifacts.
    pub docs_dir: PathBuf,
    /// Repository root; readable by the editor tool's `view` op.
    pub repo_dir: PathBuf,

    /// Response cap for document generation requests.
    pub max_tokens: u64,
    /// Response cap for clustering requests.
    pub max_token_per_module: u64,
    /// Component-token budget below which a set becomes a single leaf module.
    pub max_token_per_leaf_module: u64,
    /// Recursion cap for clustering; overrides the budget when reached.
    pub max_depth: u32,
    /// In-flight leaf generations; must be at least 1.
    pub concurrency: usize,

    pub main_model: String,
    #[serde(default)]
    pub fallback_models: Vec<String>,
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,

    /// External agent command line. When set, the run uses subprocess mode
    /// and the command is also the first gateway backend.
    #[serde(default)]
    pub agent_cmd: Option<String>,

    /// Appended verbatim to every system prompt.
    #[serde(default)]
    pub custom_instructions: Option<String>,

    /// Stop dispatching new modules after the first failure.
    #[serde(default)]
    pub fail_fast: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            docs_dir: PathBuf::from("docs"),
            repo_dir: PathBuf::from("."),
            max_tokens: 8192,
            max_token_per_module: 4096,
            max_token_per_leaf_module: 16_000,
            max_depth: 4,
            concurrency: 4,
            main_model: String::new(),
            fallback_models: Vec::new(),
            base_url: String::new(),
            api_key: String::new(),
            agent_cmd: None,
            custom_instructions: None,
            fail_fast: false,
        }
    }
}

impl EngineConfig {
    /// Reject contradictory or unusable configurations before any side effect.
    pub fn validate(&self) -> Result<()> {
        if self.docs_dir.as_os_str().is_empty() {
            return Err(Error::config("docs_dir must not be empty"));
        }
        if self.concurrency == 0 {
            return Err(Error::config("concurrency must be at least 1"));
        }
        if self.max_token_per_leaf_module == 0 {
            return Err(Error::config("max_token_per_leaf_module must be positive"));
        }
        if self.max_tokens == 0 || self.max_token_per_module == 0 {
            return Err(Error::config("token caps must be positive"));
        }

        let has_subprocess = self
            .agent_cmd
            .as_deref()
            .is_some_and(|cmd| !cmd.trim().is_empty());
        let has_http =
            !self.main_model.is_empty() && !self.base_url.is_empty() && !self.api_key.is_empty();
        if !has_subprocess && !has_http {
            return Err(Error::config(
                "no usable backend: set agent_cmd, or base_url + api_key + main_model",
            ));
        }
        if !self.fallback_models.is_empty() && !has_http {
            return Err(Error::config(
                "fallback_models require base_url + api_key + main_model",
            ));
        }
        Ok(())
    }

    /// True when the run drives an external agent over stdio.
    pub fn subprocess_mode(&self) -> bool {
        self.agent_cmd
            .as_deref()
            .is_some_and(|cmd| !cmd.trim().is_empty())
    }
}

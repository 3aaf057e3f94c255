//! codewiki — generate a documentation wiki for a parsed repository

use clap::Parser;
use codewiki_core::{EngineConfig, Error, FailureKind, RepoManifest, RunSummary};
use codewiki_engine::{Engine, EngineContext};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "codewiki",
    about = "Turn a parsed repository into a hierarchical documentation wiki"
)]
struct Cli {
    /// Component manifest produced by the parser (components + leaf ids)
    #[arg(short = 'c', long)]
    components: PathBuf,

    /// Output directory for the wiki
    #[arg(short = 'o', long, default_value = "docs")]
    docs_dir: PathBuf,

    /// Repository root, readable by the agent's view tool
    #[arg(short = 'r', long, default_value = ".")]
    repo_dir: PathBuf,

    /// Primary model name
    #[arg(short, long, default_value = "")]
    model: String,

    /// Fallback models, tried in order after the primary
    #[arg(long = "fallback-model")]
    fallback_models: Vec<String>,

    /// Chat-completions base URL
    #[arg(long, default_value = "")]
    base_url: String,

    /// API key; falls back to $CODEWIKI_API_KEY
    #[arg(long, default_value = "")]
    api_key: String,

    /// External agent command; switches the run to subprocess mode
    #[arg(long)]
    agent_cmd: Option<String>,

    /// Extra instructions appended to every prompt
    #[arg(long)]
    instructions: Option<String>,

    /// Parallel leaf generations
    #[arg(long, default_value_t = 4)]
    concurrency: usize,

    /// Maximum module tree depth
    #[arg(long, default_value_t = 4)]
    max_depth: u32,

    /// Response token cap for document generation
    #[arg(long, default_value_t = 8192)]
    max_tokens: u64,

    /// Response token cap for clustering requests
    #[arg(long, default_value_t = 4096)]
    max_token_per_module: u64,

    /// Component-token budget per leaf module
    #[arg(long, default_value_t = 16_000)]
    max_token_per_leaf_module: u64,

    /// Stop after the first module failure
    #[arg(long)]
    fail_fast: bool,
}

// Exit codes: 0 success, 2 partial, 3 every request exhausted the cascade,
// 4 invalid config, 130 cancelled.
const EXIT_PARTIAL: u8 = 2;
const EXIT_EXHAUSTED: u8 = 3;
const EXIT_CONFIG: u8 = 4;
const EXIT_CANCELLED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "codewiki=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let api_key = if cli.api_key.is_empty() {
        std::env::var("CODEWIKI_API_KEY").unwrap_or_default()
    } else {
        cli.api_key.clone()
    };

    let config = EngineConfig {
        docs_dir: cli.docs_dir,
        repo_dir: cli.repo_dir,
        max_tokens: cli.max_tokens,
        max_token_per_module: cli.max_token_per_module,
        max_token_per_leaf_module: cli.max_token_per_leaf_module,
        max_depth: cli.max_depth,
        concurrency: cli.concurrency,
        main_model: cli.model,
        fallback_models: cli.fallback_models,
        base_url: cli.base_url,
        api_key,
        agent_cmd: cli.agent_cmd,
        custom_instructions: cli.instructions,
        fail_fast: cli.fail_fast,
    };
    if let Err(err) = config.validate() {
        eprintln!("codewiki: {err}");
        return ExitCode::from(EXIT_CONFIG);
    }

    let manifest_text = match std::fs::read_to_string(&cli.components) {
        Ok(text) => text,
        Err(err) => {
            eprintln!("codewiki: cannot read {}: {err}", cli.components.display());
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    let (components, leaves) = match RepoManifest::from_json(&manifest_text)
        .and_then(RepoManifest::into_inputs)
    {
        Ok(inputs) => inputs,
        Err(err) => {
            eprintln!("codewiki: invalid manifest: {err}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, finishing in-flight modules");
            ctrl_c_cancel.cancel();
        }
    });

    let ctx = EngineContext::new(config, components, leaves).with_cancel(cancel);
    match Engine::run(ctx).await {
        Ok(summary) => {
            report(&summary);
            if summary.ok {
                ExitCode::SUCCESS
            } else if exhausted_entirely(&summary) {
                ExitCode::from(EXIT_EXHAUSTED)
            } else {
                ExitCode::from(EXIT_PARTIAL)
            }
        }
        Err(Error::Cancelled) => {
            eprintln!("codewiki: cancelled, partial output preserved");
            ExitCode::from(EXIT_CANCELLED)
        }
        Err(err @ Error::ConfigInvalid(_)) => {
            eprintln!("codewiki: {err}");
            ExitCode::from(EXIT_CONFIG)
        }
        Err(err) => {
            eprintln!("codewiki: {err}");
            ExitCode::from(EXIT_EXHAUSTED)
        }
    }
}

fn report(summary: &RunSummary) {
    println!(
        "{}/{} modules documented{}",
        summary.modules_done,
        summary.modules_total,
        if summary.modules_failed > 0 {
            format!(", {} failed", summary.modules_failed)
        } else {
            String::new()
        }
    );
    for failure in &summary.failures {
        eprintln!("  failed: {failure}");
    }
}

/// Nothing succeeded and every failure traces back to a dead cascade.
/// Modules blocked behind an exhausted one count as part of the same outage.
fn exhausted_entirely(summary: &RunSummary) -> bool {
    summary.modules_done == 0
        && !summary.failures.is_empty()
        && summary
            .failures
            .iter()
            .all(|f| matches!(f.kind, FailureKind::Exhausted | FailureKind::Blocked))
        && summary
            .failures
            .iter()
            .any(|f| f.kind == FailureKind::Exhausted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use codewiki_core::ModuleFailure;

    fn failure(module: &str, kind: FailureKind, message: &str) -> ModuleFailure {
        ModuleFailure {
            module: module.into(),
            kind,
            message: message.into(),
        }
    }

    fn summary(done: usize, failures: Vec<ModuleFailure>) -> RunSummary {
        RunSummary {
            ok: done > 0 && failures.is_empty(),
            modules_total: done + failures.len(),
            modules_done: done,
            modules_failed: failures.len(),
            failures,
        }
    }

    #[test]
    fn subprocess_total_failure_counts_as_exhausted() {
        // Every leaf died in the agent command, the overview is blocked
        // behind them; none of the messages mention a backend by name.
        let summary = summary(
            0,
            vec![
                failure(
                    "alpha",
                    FailureKind::Exhausted,
                    "module 'subprocess' failed: agent command exited with Some(1): broken",
                ),
                failure(
                    "beta",
                    FailureKind::Exhausted,
                    "module 'subprocess' failed: failed to spawn agent command: not found",
                ),
                failure(
                    "overview",
                    FailureKind::Blocked,
                    "blocked: not all modules documented",
                ),
            ],
        );
        assert!(exhausted_entirely(&summary));
    }

    #[test]
    fn partial_success_is_not_exhausted() {
        let summary = summary(
            2,
            vec![failure("gamma", FailureKind::Exhausted, "all backends failed")],
        );
        assert!(!exhausted_entirely(&summary));
    }

    #[test]
    fn bad_agent_output_is_not_exhausted() {
        let summary = summary(
            0,
            vec![failure("alpha", FailureKind::InvalidOutput, "output too short")],
        );
        assert!(!exhausted_entirely(&summary));
    }

    #[test]
    fn blocked_modules_alone_are_not_exhausted() {
        let summary = summary(
            0,
            vec![failure(
                "overview",
                FailureKind::Blocked,
                "blocked: not all modules documented",
            )],
        );
        assert!(!exhausted_entirely(&summary));
    }

    #[test]
    fn clean_run_is_not_exhausted() {
        assert!(!exhausted_entirely(&summary(3, vec![])));
    }
}

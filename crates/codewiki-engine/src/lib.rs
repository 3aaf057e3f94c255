//! Documentation-synthesis engine: clusters a parsed repository into a
//! module tree, then drives per-module agents to produce one markdown
//! artifact each, with durable checkpoint/resume over the docs directory.

pub mod cluster;
pub mod engine;
pub mod orchestrate;
pub mod output;
pub mod prompt;
pub mod schedule;
pub mod store;

pub use cluster::{ClusterOutcome, Clusterer};
pub use engine::{Engine, EngineContext};
pub use orchestrate::{AgentMode, Orchestrator};
pub use output::{extract_overview, fence_strip};
pub use schedule::{ScheduleReport, Scheduler};
pub use store::{read_commit_id, Metadata, MetadataCounts, TreeStore, OVERVIEW_FILE};

//! Pull-request review orchestrator.
//!
//! Two entrypoints, [`orchestrator::review`] and
//! [`orchestrator::incremental_review`], drive a pipeline of independent
//! components: fetch PR + diff from a VCS adapter (`vcs`), build a prompt
//! (`prompt`), call a model backend (`model`), parse its wire-format output
//! (`response_parser`), drop low-confidence comments (`precision_filter`),
//! deduplicate against the PR's existing comment stream (`dedup`), and post
//! the result with idempotency and checkpoint maintenance
//! (`comment_manager`). `checkpoint` and `incremental` support resuming a
//! review from the last reviewed commit instead of re-reviewing the whole
//! diff every time.
//!
//! The pipeline uses `tracing` for per-stage debug logging and avoids
//! `async-trait` and heap trait objects: adapters are enum-dispatched
//! (`vcs::VcsClient`, `model::ModelClient`) and capability traits are
//! implemented directly on the concrete enum, never as `dyn Trait`.

pub mod checkpoint;
pub mod comment_manager;
pub mod config;
pub mod dedup;
pub mod diff;
pub mod errors;
pub mod incremental;
pub mod model;
pub mod orchestrator;
pub mod precision_filter;
pub mod prompt;
pub mod response_parser;
pub mod runtime;
pub mod vcs;

pub use config::OrchestratorConfig;
pub use errors::{Error, OrchResult};
pub use model::{ModelClient, ModelConfig};
pub use orchestrator::{incremental_review, review, IncrementalOptions, ReviewExtras, ReviewOutcome};
pub use runtime::OrchestratorRuntime;
pub use vcs::{ProviderConfig, VcsClient};

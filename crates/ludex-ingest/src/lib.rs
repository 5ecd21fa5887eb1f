//! Incremental ingestion and reconciliation pipeline for the game catalog.
//!
//! Pulls the paginated RAWG listing page by page, archives each raw page
//! before interpreting it, normalizes and fingerprints the rows, classifies
//! them against the canonical catalog, and upserts only what changed.
//! Progress is checkpointed after every reconciled page so interrupted runs
//! resume without refetching finished work.

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod archive;
pub mod classify;
pub mod config;
pub mod error;
pub mod normalize;
pub mod orchestrator;
pub mod rawg;
pub mod reconcile;
pub mod retry;
pub mod store;
pub mod types;

pub use error::{PipelineError, PipelineResult};
pub use orchestrator::Orchestrator;
pub use types::{GameRecord, PageCursor, RunKind, RunReport, RunStatus};

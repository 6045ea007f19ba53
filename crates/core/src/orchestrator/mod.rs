//! Work item orchestrator for automated lifecycle processing.
//!
//! The orchestrator drives items through the lifecycle one stage at a time:
//! - **Workers**: a fixed pool, one item per worker, so site pacing and
//!   reasoning cost stay bounded
//! - **Generation**: a separate, smaller limit since it is the expensive stage
//! - **Commits**: every stage result is written with a status precondition,
//!   so a stale worker can never move an item twice
//!
//! The [`Scheduler`](crate::scheduler::Scheduler) feeds the queue.

mod config;
mod runner;
mod scoring;
mod stages;
mod types;

pub use config::OrchestratorConfig;
pub use runner::{Collaborators, Job, Orchestrator};
pub use scoring::{gate, score_item, ScoreResult};
pub use types::{AdvanceOutcome, OrchestratorError, OrchestratorStatus};

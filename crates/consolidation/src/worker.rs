//! The consolidation *worker* is the knowledge-graph collaborator this
//! system treats as external (spec.md §1 Non-goals: "the knowledge-graph
//! and consolidation workers beyond their queue interface"). `rl-consolidation`
//! owns the queue interface — claiming jobs, guarding single-flight
//! execution, recording run stats — and calls through this trait for the
//! actual summarize/prune/merge/communities work, the same narrow-contract
//! shape `rl_providers::LlmProvider` gives the auxiliary LLM.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use rl_domain::error::Result;

/// Counts of work performed by one consolidation run (spec.md §3
/// `ConsolidationRun`).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ConsolidationStats {
    pub summarized: u32,
    pub pruned: u32,
    pub merged: u32,
    pub communities: u32,
}

/// External collaborator that performs the actual memory consolidation
/// (summarize conversation history, prune stale nodes, merge duplicate
/// entities, recompute communities) against the knowledge-graph backend.
/// This crate never implements one — it is out of scope per spec.md §1 —
/// it only claims jobs and calls whichever implementation the daemon was
/// wired with.
#[async_trait]
pub trait ConsolidationWorker: Send + Sync {
    async fn consolidate(&self, payload: serde_json::Value) -> Result<ConsolidationStats>;
}

/// Used when no real worker is configured: claims and completes jobs with
/// zero stats rather than stalling the scheduler. Keeps `relayd doctor`
/// and tests runnable without a knowledge-graph backend present.
pub struct NoopWorker;

#[async_trait]
impl ConsolidationWorker for NoopWorker {
    async fn consolidate(&self, _payload: serde_json::Value) -> Result<ConsolidationStats> {
        Ok(ConsolidationStats::default())
    }
}

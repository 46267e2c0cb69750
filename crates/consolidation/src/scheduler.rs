//! Consolidation Scheduler (C11, spec.md §2, §5): claims
//! `memory_consolidation` jobs from `task_queue` on a fixed tick (≥ 60s,
//! spec.md §5) and runs at most one job at a time, guarded by a running
//! flag exactly as spec.md names it.
//!
//! The tick itself is driven by the caller (`gateway::main`'s
//! `tokio::time::interval` loop), the same external-tick shape
//! `rl_sandbox::SandboxSupervisor::reap_idle` uses for its reaper.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;

use rl_domain::config::ConsolidationConfig;
use rl_domain::error::Result;
use rl_store::types::{ConsolidationRun, QueuedJob, QueuedJobStatus};
use rl_store::StoreGateway;

use crate::worker::ConsolidationWorker;

pub struct ConsolidationScheduler {
    store: Arc<StoreGateway>,
    worker: Arc<dyn ConsolidationWorker>,
    job_type: String,
    running: AtomicBool,
}

/// Resets `running` on every exit path (including the early-return "no
/// job claimed" case and any future `?`-propagated error), mirroring the
/// teacher's habit of pairing a flag-guard with an RAII reset rather than
/// hand-rolling every return site.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl ConsolidationScheduler {
    pub fn new(
        store: Arc<StoreGateway>,
        worker: Arc<dyn ConsolidationWorker>,
        config: &ConsolidationConfig,
    ) -> Self {
        Self {
            store,
            worker,
            job_type: config.job_type.clone(),
            running: AtomicBool::new(false),
        }
    }

    /// Enqueues a `memory_consolidation` job (the HTTP "consolidation
    /// enqueue endpoint" of spec.md §6).
    pub fn enqueue(&self, payload: serde_json::Value) -> Result<QueuedJob> {
        let job = QueuedJob {
            id: uuid::Uuid::new_v4().to_string(),
            task_type: self.job_type.clone(),
            payload,
            status: QueuedJobStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
        };
        self.store.enqueue_job(job)
    }

    /// One scheduling tick. Returns `Ok(None)` if a run was already in
    /// flight or there was nothing to claim; otherwise runs exactly one
    /// job to completion and returns its recorded `ConsolidationRun`.
    pub async fn tick(&self) -> Result<Option<ConsolidationRun>> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("consolidation tick skipped: a run is already in flight");
            return Ok(None);
        }
        let _guard = RunningGuard(&self.running);

        let Some(job) = self.store.claim_pending_job(&self.job_type)? else {
            return Ok(None);
        };

        let started_at = Utc::now();
        tracing::debug!(job_id = %job.id, "consolidation run started");
        let run = match self.worker.consolidate(job.payload.clone()).await {
            Ok(stats) => {
                self.store.mark_job_completed(&job.id)?;
                ConsolidationRun {
                    id: uuid::Uuid::new_v4().to_string(),
                    job_id: job.id.clone(),
                    started_at,
                    completed_at: Some(Utc::now()),
                    summarized: stats.summarized,
                    pruned: stats.pruned,
                    merged: stats.merged,
                    communities: stats.communities,
                    error: None,
                }
            }
            Err(e) => {
                tracing::warn!(job_id = %job.id, error = %e, "consolidation run failed");
                self.store.mark_job_failed(&job.id, e.to_string())?;
                ConsolidationRun {
                    id: uuid::Uuid::new_v4().to_string(),
                    job_id: job.id.clone(),
                    started_at,
                    completed_at: Some(Utc::now()),
                    summarized: 0,
                    pruned: 0,
                    merged: 0,
                    communities: 0,
                    error: Some(e.to_string()),
                }
            }
        };
        let run = self.store.record_consolidation_run(run)?;
        Ok(Some(run))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::{ConsolidationStats, NoopWorker};
    use async_trait::async_trait;
    use rl_domain::error::Error;
    use std::sync::atomic::AtomicU32;

    fn scheduler(store: Arc<StoreGateway>, worker: Arc<dyn ConsolidationWorker>) -> ConsolidationScheduler {
        ConsolidationScheduler::new(store, worker, &ConsolidationConfig::default())
    }

    fn store() -> Arc<StoreGateway> {
        let dir = tempfile::tempdir().unwrap();
        // leaked so the directory outlives the test function's scope
        let leaked: &'static tempfile::TempDir = Box::leak(Box::new(dir));
        Arc::new(StoreGateway::open(leaked.path()).unwrap())
    }

    #[tokio::test]
    async fn tick_with_no_job_is_noop() {
        let sched = scheduler(store(), Arc::new(NoopWorker));
        assert!(sched.tick().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn enqueue_then_tick_claims_and_records_run() {
        let sched = scheduler(store(), Arc::new(NoopWorker));
        sched.enqueue(serde_json::json!({"session_id": "s1"})).unwrap();
        let run = sched.tick().await.unwrap().expect("expected a run");
        assert_eq!(run.summarized, 0);
        assert!(run.error.is_none());
        assert!(sched.tick().await.unwrap().is_none(), "queue should be drained");
    }

    struct CountingWorker(AtomicU32);

    #[async_trait]
    impl ConsolidationWorker for CountingWorker {
        async fn consolidate(&self, _payload: serde_json::Value) -> Result<ConsolidationStats> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(ConsolidationStats {
                summarized: 3,
                pruned: 1,
                merged: 0,
                communities: 2,
            })
        }
    }

    #[tokio::test]
    async fn successful_run_records_stats() {
        let sched = scheduler(store(), Arc::new(CountingWorker(AtomicU32::new(0))));
        sched.enqueue(serde_json::json!({})).unwrap();
        let run = sched.tick().await.unwrap().unwrap();
        assert_eq!(run.summarized, 3);
        assert_eq!(run.pruned, 1);
        assert_eq!(run.communities, 2);
    }

    struct FailingWorker;

    #[async_trait]
    impl ConsolidationWorker for FailingWorker {
        async fn consolidate(&self, _payload: serde_json::Value) -> Result<ConsolidationStats> {
            Err(Error::Other("graph backend unreachable".into()))
        }
    }

    #[tokio::test]
    async fn failed_run_marks_job_failed_and_records_error() {
        let st = store();
        let sched = scheduler(st.clone(), Arc::new(FailingWorker));
        let job = sched.enqueue(serde_json::json!({})).unwrap();
        let run = sched.tick().await.unwrap().unwrap();
        assert!(run.error.is_some());
        assert!(st.claim_pending_job(&job.task_type).unwrap().is_none());
    }
}

//! Consolidation Scheduler (C11, spec.md §2, §4.6's `task_queue`, §5, §6).

pub mod scheduler;
pub mod worker;

pub use scheduler::ConsolidationScheduler;
pub use worker::{ConsolidationStats, ConsolidationWorker, NoopWorker};

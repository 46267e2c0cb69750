use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Consolidation Scheduler (C11)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidationConfig {
    /// Poll tick for claiming `memory_consolidation` jobs (spec.md §5:
    /// "fixed tick (≥ 60s)").
    #[serde(default = "d_poll_secs")]
    pub poll_secs: u64,
    /// `memory_consolidation`-typed job type string claimed from
    /// `task_queue`.
    #[serde(default = "d_job_type")]
    pub job_type: String,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            poll_secs: d_poll_secs(),
            job_type: d_job_type(),
        }
    }
}

fn d_poll_secs() -> u64 {
    60
}
fn d_job_type() -> String {
    "memory_consolidation".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_meets_spec_minimum() {
        assert!(ConsolidationConfig::default().poll_secs >= 60);
    }
}

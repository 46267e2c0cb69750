use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Swarm Orchestrator (C9)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmConfig {
    /// Poll interval an autonomous agent sleeps between failed task
    /// claims (spec.md §4.5 autonomous mode "sleep and retry").
    #[serde(default = "d_poll_ms")]
    pub autonomous_poll_ms: u64,
    /// Default idle timeout for autonomous agents that don't specify one.
    #[serde(default = "d_idle_timeout_secs")]
    pub default_idle_timeout_secs: u64,
    /// Default max task count for autonomous agents that don't specify one.
    #[serde(default = "d_max_tasks")]
    pub default_max_tasks: u32,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            autonomous_poll_ms: d_poll_ms(),
            default_idle_timeout_secs: d_idle_timeout_secs(),
            default_max_tasks: d_max_tasks(),
        }
    }
}

fn d_poll_ms() -> u64 {
    3_000
}
fn d_idle_timeout_secs() -> u64 {
    10 * 60
}
fn d_max_tasks() -> u32 {
    20
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_positive() {
        let cfg = SwarmConfig::default();
        assert!(cfg.autonomous_poll_ms > 0);
        assert!(cfg.default_idle_timeout_secs > 0);
        assert!(cfg.default_max_tasks > 0);
    }
}

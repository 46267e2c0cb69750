use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session Broker (C6) / Event Log (C5) / Permission Arbiter (C4)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Bound on the per-session event log (spec.md §2 C5: "N ≥ 500").
    #[serde(default = "d_max_event_log")]
    pub max_event_log: usize,
    /// Permission request deadline (spec.md §4.4: "≥ 5 minutes").
    #[serde(default = "d_permission_timeout_ms")]
    pub permission_timeout_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            max_event_log: d_max_event_log(),
            permission_timeout_ms: d_permission_timeout_ms(),
        }
    }
}

fn d_max_event_log() -> usize {
    500
}
fn d_permission_timeout_ms() -> u64 {
    5 * 60 * 1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_meet_spec_minimums() {
        let cfg = BrokerConfig::default();
        assert!(cfg.max_event_log >= 500);
        assert!(cfg.permission_timeout_ms >= 5 * 60 * 1000);
    }
}
